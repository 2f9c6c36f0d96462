//! Microsoft Graph API client: profile, mail and OneDrive calls used by the CLI.

use crate::error::ApiError;
use crate::mail::SendMailRequest;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Microsoft Graph API client.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new Graph client rooted at `base_url` (e.g. `https://graph.microsoft.com/v1.0`).
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::GraphRequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_http_client(base_url, http_client))
    }

    pub(crate) fn with_http_client(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource.trim_start_matches('/'))
    }

    /// Attach the bearer token and a fresh request id, then send.
    async fn send(&self, request: RequestBuilder, access_token: &str) -> Result<Response, ApiError> {
        let request_id = Uuid::new_v4();
        debug!("Graph request {}", request_id);

        request
            .bearer_auth(access_token)
            .header("client-request-id", request_id.to_string())
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .send()
            .await
            .map_err(|e| ApiError::GraphRequestFailed(e.to_string()))
    }

    /// Fetch the current user's profile.
    pub async fn get_user_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let response = self
            .send(self.http_client.get(self.url("me")), access_token)
            .await?;
        let response = check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))
    }

    /// Send a message as the signed-in user. Graph answers 202 Accepted.
    pub async fn send_mail(&self, access_token: &str, mail: &SendMailRequest) -> Result<(), ApiError> {
        let request = self.http_client.post(self.url("me/sendMail")).json(mail);
        let response = self.send(request, access_token).await?;
        check_status(response).await?;

        info!("Mail accepted by Graph");
        Ok(())
    }

    /// Download the user's profile photo.
    ///
    /// Returns `None` when the account has no photo or the account type
    /// doesn't support photos (Graph answers 404 or 501).
    pub async fn get_profile_photo(&self, access_token: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let response = self
            .send(self.http_client.get(self.url("me/photo/$value")), access_token)
            .await?;

        let response = match check_status(response).await {
            Ok(response) => response,
            Err(ApiError::NotFound | ApiError::Unsupported) => return Ok(None),
            Err(e) => return Err(e),
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;

        Ok((!bytes.is_empty()).then(|| bytes.to_vec()))
    }

    /// Upload a file to the root of the user's OneDrive, replacing any existing file.
    pub async fn upload_to_drive_root(
        &self,
        access_token: &str,
        file_name: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<DriveItem, ApiError> {
        let resource = format!("me/drive/root:/{}:/content", urlencoding::encode(file_name));
        let request = self
            .http_client
            .put(self.url(&resource))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(content);
        let response = check_status(self.send(request, access_token).await?).await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))
    }

    /// Create a view-only sharing link for a drive item.
    pub async fn create_sharing_link(
        &self,
        access_token: &str,
        item_id: &str,
    ) -> Result<SharingLink, ApiError> {
        let resource = format!("me/drive/items/{}/createLink", urlencoding::encode(item_id));
        let request = self
            .http_client
            .post(self.url(&resource))
            .json(&CreateLinkRequest { link_type: "view" });
        let response = check_status(self.send(request, access_token).await?).await?;

        let permission: Permission = response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;

        Ok(permission.link)
    }
}

/// Pass 2xx responses through, map everything else to an [`ApiError`].
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // Don't expose raw API error details - just log them
    let body = response.text().await.unwrap_or_default();
    error!("Graph request failed: HTTP {} - {}", status, body);
    Err(ApiError::from_status(status.as_u16()))
}

/// User profile from Microsoft Graph /me endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
    /// User Principal Name (typically email-like format).
    pub user_principal_name: Option<String>,
}

impl UserProfile {
    /// Get the best available display name.
    pub fn display_name_or_upn(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }

    /// Get the best available email.
    pub fn email(&self) -> Option<String> {
        self.mail.clone().or_else(|| self.user_principal_name.clone())
    }
}

/// A OneDrive item as returned by an upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Serialize)]
struct CreateLinkRequest {
    #[serde(rename = "type")]
    link_type: &'static str,
}

#[derive(Deserialize)]
struct Permission {
    link: SharingLink,
}

/// Sharing link details from a createLink response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingLink {
    pub web_url: String,
    #[serde(rename = "type")]
    pub link_type: Option<String>,
}
