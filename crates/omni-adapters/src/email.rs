use async_trait::async_trait;
use lettre::message::{header::ContentType, Attachment as MimeAttachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as LettreMessage, SmtpTransport, Transport};
use omni_common::{Channel, Message, SendResult};

use crate::ChannelAdapter;

#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_from: String,
    pub use_tls: bool,
}

pub struct EmailAdapter {
    config: EmailConfig,
}

impl EmailAdapter {
    pub fn new(config: EmailConfig) -> Self {
        EmailAdapter { config }
    }

    fn from_address(&self) -> &str {
        if self.config.smtp_from.is_empty() {
            &self.config.smtp_user
        } else {
            &self.config.smtp_from
        }
    }

    /// Builds and sends the message synchronously, the same blocking SMTP
    /// call the Python implementation delegates to an executor thread for.
    fn send_sync(&self, message: &Message) -> Result<(), String> {
        let subject = message
            .metadata
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or("OmniMessage Notification");
        let html = message
            .metadata
            .get("html")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let body_part = if html {
            SinglePart::html(message.content.clone())
        } else {
            SinglePart::plain(message.content.clone())
        };

        let builder = LettreMessage::builder()
            .from(self.from_address().parse().map_err(|e| format!("{e}"))?)
            .to(message.target.parse().map_err(|e| format!("{e}"))?)
            .subject(subject);

        let email = if message.attachments.is_empty() {
            builder.singlepart(body_part).map_err(|e| e.to_string())?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(body_part);
            for att in &message.attachments {
                if let Some(bytes) = &att.inline_bytes {
                    let content_type = ContentType::parse(&att.content_type)
                        .unwrap_or(ContentType::parse("application/octet-stream").unwrap());
                    let part = MimeAttachment::new(att.filename.clone()).body(bytes.clone(), content_type);
                    multipart = multipart.singlepart(part);
                }
            }
            builder.multipart(multipart).map_err(|e| e.to_string())?
        };

        let mut transport_builder = if self.config.use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host).map_err(|e| e.to_string())?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        };
        transport_builder = transport_builder.port(self.config.smtp_port);
        if !self.config.smtp_user.is_empty() && !self.config.smtp_pass.is_empty() {
            transport_builder = transport_builder.credentials(Credentials::new(
                self.config.smtp_user.clone(),
                self.config.smtp_pass.clone(),
            ));
        }
        let transport = transport_builder.build();

        transport.send(&email).map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn enabled(&self) -> bool {
        !self.config.smtp_host.is_empty() && !self.config.smtp_user.is_empty()
    }

    async fn validate(&self) -> bool {
        self.enabled()
    }

    async fn send(&self, message: &Message) -> SendResult {
        if !self.enabled() {
            return SendResult::err(&message.id, Channel::Email, "Email not configured: missing SMTP settings");
        }

        let config = self.config.clone();
        let message_id = message.id.clone();
        let owned = message.clone();
        let result = tokio::task::spawn_blocking(move || EmailAdapter::new(config).send_sync(&owned)).await;

        match result {
            Ok(Ok(())) => SendResult::ok(&message_id, Channel::Email, serde_json::Value::Null),
            Ok(Err(e)) => SendResult::err(&message_id, Channel::Email, e),
            Err(e) => SendResult::err(&message_id, Channel::Email, e.to_string()),
        }
    }
}
