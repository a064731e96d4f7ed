use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NotificationsConfig;
use crate::notify::{EmailMessage, Mailer};
use crate::store::{CampaignStore, StoreError};
use crate::types::{Audience, EmailCampaignLog, Recipient};

const FIRST_NAME_PLACEHOLDER: &str = "{{first_name}}";
const FIRST_NAME_FALLBACK: &str = "Supporter";
const REPORTED_ERRORS: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignEmail {
    pub subject: String,
    #[serde(alias = "htmlContent")]
    pub html: String,
    #[serde(default, alias = "audienceFilter")]
    pub audience: Audience,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub email: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BroadcastReport {
    pub total_recipients: u64,
    pub sent: u64,
    pub failed: u64,
    /// First few delivery failures, in send order.
    pub errors: Vec<DeliveryFailure>,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Subject and HTML content are required")]
    MissingContent,
    #[error("failed to fetch recipients: {0}")]
    Recipients(#[source] StoreError),
}

/// Sends one email to every opted-in supporter in an audience, in rate
/// limited batches, and records the send in the campaign log.
pub struct Broadcaster {
    store: Arc<dyn CampaignStore>,
    mailer: Arc<dyn Mailer>,
    from_address: String,
    batch_size: usize,
    batch_delay: Duration,
}

impl Broadcaster {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        mailer: Arc<dyn Mailer>,
        config: &NotificationsConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            from_address: config.from_address.clone(),
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay(),
        }
    }

    pub async fn send(&self, email: &CampaignEmail) -> Result<BroadcastReport, BroadcastError> {
        if email.subject.trim().is_empty() || email.html.trim().is_empty() {
            return Err(BroadcastError::MissingContent);
        }

        let recipients = self
            .store
            .list_recipients(email.audience)
            .await
            .map_err(BroadcastError::Recipients)?;
        if recipients.is_empty() {
            info!(audience = %email.audience, "no recipients match audience");
            return Ok(BroadcastReport {
                total_recipients: 0,
                sent: 0,
                failed: 0,
                errors: Vec::new(),
            });
        }

        let mut sent = 0u64;
        let mut failures = Vec::new();
        let batches = recipients.chunks(self.batch_size);
        let batch_count = batches.len();
        for (index, batch) in batches.enumerate() {
            let deliveries = batch.iter().map(|recipient| self.deliver(email, recipient));
            for (recipient, result) in batch.iter().zip(join_all(deliveries).await) {
                match result {
                    Ok(()) => sent += 1,
                    Err(error) => failures.push(DeliveryFailure {
                        email: recipient.email.clone(),
                        error: error.to_string(),
                    }),
                }
            }
            if index + 1 < batch_count {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        let report = BroadcastReport {
            total_recipients: recipients.len() as u64,
            sent,
            failed: failures.len() as u64,
            errors: failures.into_iter().take(REPORTED_ERRORS).collect(),
        };
        self.log_campaign(email, &report).await;
        info!(
            audience = %email.audience,
            total = report.total_recipients,
            sent = report.sent,
            failed = report.failed,
            "campaign email sent"
        );
        Ok(report)
    }

    async fn deliver(&self, email: &CampaignEmail, recipient: &Recipient) -> anyhow::Result<()> {
        let message = EmailMessage {
            from: self.from_address.clone(),
            to: recipient.email.clone(),
            subject: email.subject.clone(),
            html: personalize(&email.html, &recipient.first_name),
        };
        self.mailer.send(&message).await
    }

    async fn log_campaign(&self, email: &CampaignEmail, report: &BroadcastReport) {
        let log = EmailCampaignLog {
            subject: email.subject.clone(),
            audience: email.audience,
            recipients_count: report.total_recipients,
            sent_count: report.sent,
            failed_count: report.failed,
            sent_at: Utc::now(),
        };
        if let Err(error) = self.store.record_email_campaign(&log).await {
            warn!("failed to log campaign send: {error}");
        }
    }
}

pub fn personalize(html: &str, first_name: &str) -> String {
    let name = match first_name.trim() {
        "" => FIRST_NAME_FALLBACK,
        name => name,
    };
    html.replace(FIRST_NAME_PLACEHOLDER, name)
}
