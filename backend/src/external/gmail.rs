//! Email notifications through the Gmail API
//!
//! Messages are assembled as MIME locally and posted base64url-encoded to
//! `users/me/messages/send`, authenticated with an OAuth2 access token
//! obtained from a stored refresh token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;

use crate::config::EmailConfig;
use crate::error::{AppError, AppResult};

/// Placeholder in a message body marking where an attached image is shown
pub const INLINE_IMAGE_PLACEHOLDER: &str = "<img>";

const INLINE_IMAGE_ID: &str = "inline_image";
const RELATED_BOUNDARY: &str = "----=_rainfall_related";
const ALTERNATIVE_BOUNDARY: &str = "----=_rainfall_alternative";

/// A notification to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub subject: String,
    /// Plain text; may contain [`INLINE_IMAGE_PLACEHOLDER`]
    pub body: String,
    pub attachment: Option<PathBuf>,
}

/// Delivery channel for notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> AppResult<()>;
}

/// Notifier that only writes the message to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &EmailMessage) -> AppResult<()> {
        tracing::info!(
            subject = %message.subject,
            attachment = ?message.attachment,
            "Email disabled, notification not sent: {}",
            message.body.replace(INLINE_IMAGE_PLACEHOLDER, "")
        );
        Ok(())
    }
}

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Gmail API client
#[derive(Clone)]
pub struct GmailClient {
    client: Client,
    config: EmailConfig,
}

impl GmailClient {
    /// Create a client, checking the credentials needed to send are present
    pub fn new(config: &EmailConfig) -> AppResult<Self> {
        let required = [
            ("email.sender", &config.sender),
            ("email.recipient", &config.recipient),
            ("email.client_id", &config.client_id),
            ("email.client_secret", &config.client_secret),
            ("email.refresh_token", &config.refresh_token),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(AppError::Configuration(format!("{} must be set to send email", name)));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Exchange the refresh token for a short-lived access token
    async fn access_token(&self) -> AppResult<String> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", self.config.refresh_token.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::NotificationFailure(format!("Token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NotificationFailure(format!(
                "Token refresh failed: {} - {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::NotificationFailure(format!("Failed to parse token response: {}", e))
        })?;

        Ok(token.access_token)
    }
}

#[async_trait]
impl Notifier for GmailClient {
    async fn send(&self, message: &EmailMessage) -> AppResult<()> {
        let attachment = match &message.attachment {
            Some(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    AppError::NotificationFailure(format!("Cannot read attachment {}: {}", path.display(), e))
                })?;
                Some((path.as_path(), bytes))
            }
            None => None,
        };

        let mime = build_mime_message(
            &self.config.sender,
            &self.config.recipient,
            message,
            attachment.as_ref().map(|(path, bytes)| (*path, bytes.as_slice())),
        );

        let token = self.access_token().await?;
        let url = format!("{}/users/me/messages/send", self.config.api_base);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": URL_SAFE.encode(mime.as_bytes()) }))
            .send()
            .await
            .map_err(|e| AppError::NotificationFailure(format!("Gmail request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::NotificationFailure(format!(
                "Gmail send failed: {} - {}",
                status, body
            )));
        }

        tracing::info!("Email sent successfully to {}", self.config.recipient);
        Ok(())
    }
}

/// MIME type for an attachment, by file extension
pub fn attachment_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Base64 with 76-column lines
fn encode_wrapped(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    for chunk in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

/// HTML rendering of a plain-text body
pub fn html_body(body: &str, inline_image: bool) -> String {
    let image = if inline_image {
        format!(
            r#"<img src="cid:{}" style="max-width:600px; height:auto;">"#,
            INLINE_IMAGE_ID
        )
    } else {
        String::new()
    };
    let html = body
        .replace('\n', "<br>")
        .replace(INLINE_IMAGE_PLACEHOLDER, &image);
    format!("<html>\r\n<body>\r\n<p>{}</p>\r\n</body>\r\n</html>\r\n", html)
}

/// Assemble a `multipart/related` message with plain and HTML alternatives
///
/// An image attachment is shown inline when the body has the placeholder,
/// otherwise every attachment is an ordinary one.
pub fn build_mime_message(
    sender: &str,
    recipient: &str,
    message: &EmailMessage,
    attachment: Option<(&Path, &[u8])>,
) -> String {
    let has_placeholder = message.body.contains(INLINE_IMAGE_PLACEHOLDER);
    let attachment = attachment.map(|(path, bytes)| {
        let content_type = attachment_content_type(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        (content_type, file_name, bytes)
    });
    let inline_image = has_placeholder
        && attachment
            .as_ref()
            .map_or(false, |(content_type, _, _)| content_type.starts_with("image/"));

    let plain = message.body.replace(INLINE_IMAGE_PLACEHOLDER, "");
    let html = html_body(&message.body, inline_image);

    let mut mime = String::new();
    mime.push_str(&format!("From: {}\r\n", sender));
    mime.push_str(&format!("To: {}\r\n", recipient));
    mime.push_str(&format!("Subject: {}\r\n", message.subject));
    mime.push_str("MIME-Version: 1.0\r\n");
    mime.push_str(&format!(
        "Content-Type: multipart/related; boundary=\"{}\"\r\n\r\n",
        RELATED_BOUNDARY
    ));

    mime.push_str(&format!("--{}\r\n", RELATED_BOUNDARY));
    mime.push_str(&format!(
        "Content-Type: multipart/alternative; boundary=\"{}\"\r\n\r\n",
        ALTERNATIVE_BOUNDARY
    ));
    for (content_type, text) in [("text/plain", plain.as_str()), ("text/html", html.as_str())] {
        mime.push_str(&format!("--{}\r\n", ALTERNATIVE_BOUNDARY));
        mime.push_str(&format!("Content-Type: {}; charset=\"utf-8\"\r\n", content_type));
        mime.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        mime.push_str(&encode_wrapped(text.as_bytes()));
    }
    mime.push_str(&format!("--{}--\r\n", ALTERNATIVE_BOUNDARY));

    if let Some((content_type, file_name, bytes)) = attachment {
        mime.push_str(&format!("--{}\r\n", RELATED_BOUNDARY));
        if inline_image {
            mime.push_str(&format!("Content-Type: {}; name=\"{}\"\r\n", content_type, INLINE_IMAGE_ID));
            mime.push_str(&format!("Content-ID: <{}>\r\n", INLINE_IMAGE_ID));
            mime.push_str(&format!(
                "Content-Disposition: inline; filename=\"{}\"\r\n",
                INLINE_IMAGE_ID
            ));
        } else {
            mime.push_str(&format!("Content-Type: {}; name=\"{}\"\r\n", content_type, file_name));
            mime.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{}\"\r\n",
                file_name
            ));
        }
        mime.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        mime.push_str(&encode_wrapped(bytes));
    }

    mime.push_str(&format!("--{}--\r\n", RELATED_BOUNDARY));
    mime
}
