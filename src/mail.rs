//! The `sendMail` payload and the connect sample message.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;

const SUBJECT: &str = "Welcome to Microsoft Graph development with Rust";

/// Body of `POST /me/sendMail`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMailRequest {
    pub message: Message,
    pub save_to_sent_items: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub subject: String,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<FileAttachment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    /// "HTML" or "Text".
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailAddress {
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    #[serde(rename = "@odata.type")]
    pub odata_type: &'static str,
    pub name: String,
    pub content_type: String,
    /// Base64 encoded file content.
    pub content_bytes: String,
}

impl FileAttachment {
    pub fn new(name: &str, content_type: &str, content: &[u8]) -> Self {
        Self {
            odata_type: "#microsoft.graph.fileAttachment",
            name: name.to_string(),
            content_type: content_type.to_string(),
            content_bytes: STANDARD.encode(content),
        }
    }
}

/// The user's profile picture, shared from OneDrive.
#[derive(Debug, Clone)]
pub struct ProfilePicture {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// View link to the uploaded copy.
    pub sharing_url: Option<String>,
}

/// Build the sample message: a short HTML greeting, a link to the shared
/// profile picture and the picture itself as an attachment.
pub fn compose_connect_mail(
    recipient: &str,
    sender_name: &str,
    picture: Option<&ProfilePicture>,
) -> SendMailRequest {
    let picture_html = match picture.and_then(|p| p.sharing_url.as_deref()) {
        Some(url) => format!(
            "<p>Your profile picture is shared <a href=\"{}\">on OneDrive</a> and attached to this message.</p>",
            escape_html(url)
        ),
        None => String::new(),
    };

    let content = format!(
        "<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=us-ascii\"></head>\
         <body style=\"font-family:calibri\">\
         <h2>Congratulations {}!</h2>\
         <p>This is a message from the Microsoft Graph Connect sample. \
         You are well on your way to incorporating Microsoft Graph endpoints in your apps.</p>\
         {}\
         <h3>What's next?</h3>\
         <p>Check out the Microsoft Graph documentation at \
         <a href=\"https://learn.microsoft.com/graph\">learn.microsoft.com/graph</a>.</p>\
         </body></html>",
        escape_html(sender_name),
        picture_html
    );

    let attachments = picture
        .map(|p| {
            let extension = if p.content_type.ends_with("png") { "png" } else { "jpg" };
            vec![FileAttachment::new(
                &format!("me.{}", extension),
                &p.content_type,
                &p.bytes,
            )]
        })
        .unwrap_or_default();

    SendMailRequest {
        message: Message {
            subject: SUBJECT.to_string(),
            body: ItemBody {
                content_type: "HTML".to_string(),
                content,
            },
            to_recipients: vec![Recipient {
                email_address: EmailAddress {
                    address: recipient.to_string(),
                },
            }],
            attachments,
        },
        save_to_sent_items: true,
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub(crate) fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
