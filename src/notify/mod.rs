pub mod broadcast;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::NotificationsConfig;
use crate::http::{escape_html, read_body, HttpFailure, HTTP_CLIENT};
use crate::types::Signature;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Transactional email over the Resend HTTP API.
pub struct ResendMailer {
    client: Client,
    api_url: String,
    api_key: String,
}

impl ResendMailer {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await?;
        match read_body(response).await {
            Ok(_) => Ok(()),
            Err(HttpFailure::Transport(error)) => Err(error.into()),
            Err(HttpFailure::Status { status, message: reason }) => {
                Err(anyhow!("email to {} rejected ({status}): {reason}", message.to))
            }
        }
    }
}

/// Mailer used when no email provider is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(to = %message.to, subject = %message.subject, "email delivery skipped, no provider configured");
        Ok(())
    }
}

/// Reacts to a newly persisted signature. Runs detached from the submission;
/// its errors are logged and never reach the signer.
#[async_trait]
pub trait SignatureNotifier: Send + Sync {
    async fn signature_created(&self, signature: &Signature) -> Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl SignatureNotifier for LogNotifier {
    async fn signature_created(&self, signature: &Signature) -> Result<()> {
        info!(
            signature_id = signature.id,
            consent_petition = signature.consent_petition,
            "signature recorded"
        );
        Ok(())
    }
}

/// Thank-you email to the signer plus an alert to the campaign inbox.
pub struct EmailNotifier {
    mailer: Arc<dyn Mailer>,
    from_address: String,
    alert_from_address: String,
    admin_email: String,
}

impl EmailNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, config: &NotificationsConfig) -> Self {
        Self {
            mailer,
            from_address: config.from_address.clone(),
            alert_from_address: config.alert_from_address.clone(),
            admin_email: config.admin_email.clone(),
        }
    }

    fn thank_you(&self, signature: &Signature) -> EmailMessage {
        EmailMessage {
            from: self.from_address.clone(),
            to: signature.email.clone(),
            subject: "Thank you for signing our petition!".to_string(),
            html: format!(
                r#"<h1>Thank You for Your Support!</h1>
<p>Hi {first_name},</p>
<p>Thank you for signing our petition to support the Salt Spring Island Arena project. Your voice matters!</p>
<h2>Next Steps:</h2>
<ul>
  <li>Share the petition with your network</li>
  <li>Follow us on social media for updates</li>
  <li>We'll keep you posted on our progress</li>
</ul>
<p>Together we can make this arena a reality for our community!</p>
<p>Best regards,<br>The SSI Arena Campaign Team</p>"#,
                first_name = escape_html(&signature.first_name),
            ),
        }
    }

    fn admin_alert(&self, signature: &Signature) -> EmailMessage {
        let yes_no = |flag: bool| if flag { "Yes" } else { "No" };
        EmailMessage {
            from: self.alert_from_address.clone(),
            to: self.admin_email.clone(),
            subject: "New Petition Signature!".to_string(),
            html: format!(
                r#"<h2>New signature received!</h2>
<p><strong>Name:</strong> {name}</p>
<p><strong>Email:</strong> {email}</p>
<p><strong>Postal Code:</strong> {postal}</p>
<p><strong>Consented to Petition:</strong> {petition}</p>
<p><strong>Wants Updates:</strong> {updates}</p>
<p><strong>Time:</strong> {time}</p>"#,
                name = escape_html(&signature.full_name()),
                email = escape_html(&signature.email),
                postal = escape_html(&signature.postal_code),
                petition = yes_no(signature.consent_petition),
                updates = yes_no(signature.consent_updates),
                time = signature.created_at.format("%Y-%m-%d %H:%M UTC"),
            ),
        }
    }
}

#[async_trait]
impl SignatureNotifier for EmailNotifier {
    async fn signature_created(&self, signature: &Signature) -> Result<()> {
        // Each email is independent; one failing must not suppress the other.
        if let Err(error) = self.mailer.send(&self.thank_you(signature)).await {
            warn!(signature_id = signature.id, "failed to send thank-you email: {error}");
        }
        if self.admin_email.trim().is_empty() {
            return Ok(());
        }
        if let Err(error) = self.mailer.send(&self.admin_alert(signature)).await {
            warn!(signature_id = signature.id, "failed to send notification email: {error}");
        }
        Ok(())
    }
}

/// Mailer for the configured provider, or a logging stand-in.
pub fn mailer_from_config(config: &NotificationsConfig) -> Arc<dyn Mailer> {
    if config.resend_api_key.trim().is_empty() {
        Arc::new(LogMailer)
    } else {
        Arc::new(ResendMailer::new(
            config.resend_api_url.clone(),
            config.resend_api_key.clone(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::testing::RecordingMailer;
    use super::*;

    fn signature() -> Signature {
        Signature {
            id: 3,
            first_name: "<Jo>".to_string(),
            last_name: "Rink".to_string(),
            email: "jo@example.com".to_string(),
            postal_code: "V8K 2A1".to_string(),
            consent_petition: true,
            consent_updates: false,
            created_at: Utc::now(),
        }
    }

    fn config(admin_email: &str) -> NotificationsConfig {
        NotificationsConfig {
            admin_email: admin_email.to_string(),
            ..NotificationsConfig::default()
        }
    }

    #[tokio::test]
    async fn sends_thank_you_and_admin_alert() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = EmailNotifier::new(mailer.clone(), &config("team@example.com"));
        notifier
            .signature_created(&signature())
            .await
            .expect("notify");

        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "jo@example.com");
        assert!(sent[0].html.contains("Hi &lt;Jo&gt;,"));
        assert_eq!(sent[1].to, "team@example.com");
        assert!(sent[1].html.contains("<strong>Consented to Petition:</strong> Yes"));
    }

    #[tokio::test]
    async fn failed_thank_you_still_alerts_the_inbox() {
        let mailer = Arc::new(RecordingMailer::failing_for(&["jo@example.com"]));
        let notifier = EmailNotifier::new(mailer.clone(), &config("team@example.com"));
        notifier
            .signature_created(&signature())
            .await
            .expect("notifier swallows delivery errors");
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "team@example.com");
    }

    #[tokio::test]
    async fn skips_admin_alert_without_inbox() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = EmailNotifier::new(mailer.clone(), &config(""));
        notifier
            .signature_created(&signature())
            .await
            .expect("notify");
        assert_eq!(mailer.sent().len(), 1);
    }
}
