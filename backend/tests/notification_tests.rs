//! Notification message tests
//!
//! Tests for building decision emails:
//! - Inline image versus ordinary attachment
//! - Placeholder handling in plain and HTML bodies
//! - Gmail client credential checks

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rainfall_backend::config::EmailConfig;
use rainfall_backend::error::AppError;
use rainfall_backend::external::gmail::{
    attachment_content_type, build_mime_message, html_body, EmailMessage, GmailClient, LogNotifier,
    Notifier, INLINE_IMAGE_PLACEHOLDER,
};
use std::path::Path;

fn message(body: &str) -> EmailMessage {
    EmailMessage {
        subject: "Water the garden today".to_string(),
        body: body.to_string(),
        attachment: None,
    }
}

/// Decode every base64 body part that decodes to UTF-8 text
fn decoded_parts(mime: &str) -> Vec<String> {
    mime.split("\r\n\r\n")
        .skip(1)
        .filter_map(|part| {
            let encoded: String = part
                .lines()
                .take_while(|line| !line.starts_with("--"))
                .collect();
            let bytes = STANDARD.decode(encoded.trim()).ok()?;
            String::from_utf8(bytes).ok()
        })
        .collect()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(attachment_content_type(Path::new("img/forecast.png")), "image/png");
        assert_eq!(attachment_content_type(Path::new("chart.JPG")), "image/jpeg");
        assert_eq!(attachment_content_type(Path::new("forecast.svg")), "image/svg+xml");
        assert_eq!(attachment_content_type(Path::new("data.csv")), "application/octet-stream");
        assert_eq!(attachment_content_type(Path::new("noext")), "application/octet-stream");
    }

    /// Headers carry the addresses and subject
    #[test]
    fn test_headers() {
        let mime = build_mime_message("me@example.com", "you@example.com", &message("Hi"), None);

        assert!(mime.starts_with("From: me@example.com\r\nTo: you@example.com\r\n"));
        assert!(mime.contains("Subject: Water the garden today\r\n"));
        assert!(mime.contains("multipart/related"));
        assert!(mime.contains("multipart/alternative"));
    }

    /// The placeholder never reaches the plain-text part
    #[test]
    fn test_plain_text_drops_placeholder() {
        let body = format!("Rain is low.\n{}", INLINE_IMAGE_PLACEHOLDER);
        let mime = build_mime_message("a@example.com", "b@example.com", &message(&body), None);

        let parts = decoded_parts(&mime);
        assert!(parts.iter().any(|p| p == "Rain is low.\n"));
        assert!(parts.iter().all(|p| !p.contains(INLINE_IMAGE_PLACEHOLDER)));
    }

    /// An image with a placeholder is embedded by content id
    #[test]
    fn test_image_is_inline_with_placeholder() {
        let body = format!("See chart {}", INLINE_IMAGE_PLACEHOLDER);
        let mime = build_mime_message(
            "a@example.com",
            "b@example.com",
            &message(&body),
            Some((Path::new("img/forecast.svg"), b"<svg/>")),
        );

        assert!(mime.contains("Content-ID: <inline_image>"));
        assert!(mime.contains("Content-Disposition: inline"));
        assert!(decoded_parts(&mime).iter().any(|p| p.contains("cid:inline_image")));
    }

    /// Without a placeholder the image is a plain attachment
    #[test]
    fn test_image_is_attachment_without_placeholder() {
        let mime = build_mime_message(
            "a@example.com",
            "b@example.com",
            &message("See attached"),
            Some((Path::new("img/forecast.png"), &[0x89, 0x50, 0x4e, 0x47])),
        );

        assert!(!mime.contains("Content-ID"));
        assert!(mime.contains("Content-Disposition: attachment; filename=\"forecast.png\""));
        assert!(mime.contains("Content-Type: image/png; name=\"forecast.png\""));
    }

    /// Non-image files are never inlined
    #[test]
    fn test_non_image_is_attachment_even_with_placeholder() {
        let body = format!("Data {}", INLINE_IMAGE_PLACEHOLDER);
        let mime = build_mime_message(
            "a@example.com",
            "b@example.com",
            &message(&body),
            Some((Path::new("features.csv"), b"date,label\n")),
        );

        assert!(!mime.contains("Content-ID"));
        assert!(mime.contains("Content-Disposition: attachment; filename=\"features.csv\""));
    }

    #[test]
    fn test_html_body_line_breaks() {
        let html = html_body("one\ntwo", false);
        assert!(html.contains("<p>one<br>two</p>"));

        let with_image = html_body(&format!("x{}", INLINE_IMAGE_PLACEHOLDER), true);
        assert!(with_image.contains(r#"<img src="cid:inline_image""#));
    }

    /// Missing credentials are a configuration error
    #[test]
    fn test_gmail_client_requires_credentials() {
        let config = EmailConfig {
            enabled: true,
            sender: "me@example.com".to_string(),
            recipient: "me@example.com".to_string(),
            ..EmailConfig::default()
        };

        match GmailClient::new(&config) {
            Err(AppError::Configuration(message)) => assert!(message.contains("client_id")),
            Err(other) => panic!("expected Configuration, got {:?}", other),
            Ok(_) => panic!("client built without credentials"),
        }
    }

    #[test]
    fn test_gmail_client_with_credentials() {
        let config = EmailConfig {
            enabled: true,
            sender: "me@example.com".to_string(),
            recipient: "me@example.com".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "token".to_string(),
            ..EmailConfig::default()
        };

        assert!(GmailClient::new(&config).is_ok());
    }

    /// An unreadable attachment fails the send as a notification failure
    #[tokio::test]
    async fn test_missing_attachment_is_notification_failure() {
        let config = EmailConfig {
            enabled: true,
            sender: "me@example.com".to_string(),
            recipient: "me@example.com".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "token".to_string(),
            ..EmailConfig::default()
        };
        let client = GmailClient::new(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut msg = message("Hi");
        msg.attachment = Some(dir.path().join("missing.svg"));

        let result = client.send(&msg).await;
        assert!(matches!(result, Err(AppError::NotificationFailure(_))));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.send(&message("Hi")).await.is_ok());
    }
}
