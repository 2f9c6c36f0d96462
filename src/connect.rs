//! The connect sample: send the welcome mail as the signed-in user.

use tracing::{info, warn};

use crate::auth::graph::GraphClient;
use crate::auth::{AuthSession, IdentityProvider};
use crate::error::{ApiError, AppError};
use crate::mail::{compose_connect_mail, ProfilePicture};

/// Name of the uploaded copy of the profile photo.
const PICTURE_FILE_NAME: &str = "me.jpg";
/// Graph serves profile photos as JPEG.
const PICTURE_CONTENT_TYPE: &str = "image/jpeg";

/// What [`send_connect_mail`] delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub recipient: String,
    pub with_picture: bool,
}

/// Acquire a token and send the welcome mail.
///
/// `to` defaults to the signed-in account. When `share_picture` is set the
/// profile photo is uploaded to OneDrive, linked and attached; any failure
/// there degrades to a plain mail. A 401 from `sendMail` signs the session
/// out.
pub async fn send_connect_mail<P: IdentityProvider>(
    session: &AuthSession<P>,
    graph: &GraphClient,
    to: Option<&str>,
    share_picture: bool,
) -> Result<SentMail, AppError> {
    // Silent when a session is cached; the browser only opens if the refresh token is unusable.
    let token = session.acquire_default().await.into_result()?;

    let account = session.store().current_account();
    let recipient = to
        .map(str::to_string)
        .or_else(|| account.as_ref().map(|a| a.username.clone()))
        .filter(|address| !address.trim().is_empty())
        .ok_or(AppError::NoRecipient)?;
    let sender_name = account
        .as_ref()
        .map(|a| a.display_name.clone())
        .unwrap_or_else(|| recipient.clone());

    let picture = if share_picture {
        match share_profile_picture(graph, token.as_str()).await {
            Ok(picture) => Some(picture),
            Err(ApiError::NoPicture) => {
                info!("Account has no profile photo");
                None
            }
            Err(e) => {
                warn!("Sending without profile picture: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mail = compose_connect_mail(&recipient, &sender_name, picture.as_ref());

    if let Err(e) = graph.send_mail(token.as_str(), &mail).await {
        let err = AppError::from(e);
        if err.requires_sign_out() {
            warn!("Graph rejected the token, signing out");
            session.disconnect().await;
        }
        return Err(err);
    }

    Ok(SentMail {
        recipient,
        with_picture: picture.is_some(),
    })
}

/// Fetch the profile photo, upload it to OneDrive and share it.
pub async fn share_profile_picture(
    graph: &GraphClient,
    access_token: &str,
) -> Result<ProfilePicture, ApiError> {
    let bytes = graph
        .get_profile_photo(access_token)
        .await?
        .ok_or(ApiError::NoPicture)?;

    let item = graph
        .upload_to_drive_root(access_token, PICTURE_FILE_NAME, PICTURE_CONTENT_TYPE, bytes.clone())
        .await?;
    let link = graph.create_sharing_link(access_token, &item.id).await?;

    Ok(ProfilePicture {
        bytes,
        content_type: PICTURE_CONTENT_TYPE.to_string(),
        sharing_url: Some(link.web_url),
    })
}
