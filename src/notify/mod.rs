//! Outbound mail.

mod console;
mod smtp;

use async_trait::async_trait;
use thiserror::Error;

pub use console::ConsoleNotifier;
pub use smtp::SmtpNotifier;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("mail transport rejected the message: {0}")]
    Transport(String),
}

/// Accept/reject submission of one HTML mail. There are no delivery receipts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str)
        -> Result<(), NotificationError>;
}

pub fn registration_subject(event_title: &str) -> String {
    format!("Your QR code for {event_title}")
}

/// HTML body of the registration confirmation.
pub fn registration_email(name: &str, event_title: &str, qr_image_url: &str) -> String {
    let name = escape_html(name);
    let event_title = escape_html(event_title);
    let qr_image_url = escape_html(qr_image_url);

    format!(
        r#"
<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Registration confirmed</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
        <h2 style="color: #2563eb;">You're registered for {event_title}</h2>
        <p>Hi {name}, show this QR code at the entrance to check in.</p>
        <p style="margin: 30px 0; text-align: center;">
            <img src="{qr_image_url}" alt="Your check-in QR code" width="256" height="256">
        </p>
        <p style="color: #666; font-size: 12px; margin-top: 40px;">
            If the image does not load, open this link:<br>
            <a href="{qr_image_url}">{qr_image_url}</a>
        </p>
    </div>
</body>
</html>
"#
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
