//! Marketing analytics hooks. Delivery is best-effort: the campaign service
//! logs and discards any tracker error.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    PetitionSignature,
    PledgeCommitment { value: f64, currency: String },
    NewsletterSignup,
}

impl AnalyticsEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PetitionSignature => "petition_signature",
            Self::PledgeCommitment { .. } => "pledge_commitment",
            Self::NewsletterSignup => "newsletter_signup",
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::PetitionSignature => "Petition",
            Self::PledgeCommitment { .. } => "Fundraising",
            Self::NewsletterSignup => "Engagement",
        }
    }
}

pub trait EventTracker: Send + Sync {
    fn track(&self, event: &AnalyticsEvent) -> Result<()>;
}

/// Records conversions as structured log events.
pub struct LogTracker;

impl EventTracker for LogTracker {
    fn track(&self, event: &AnalyticsEvent) -> Result<()> {
        match event {
            AnalyticsEvent::PledgeCommitment { value, currency } => info!(
                event = event.name(),
                category = event.category(),
                value,
                currency = currency.as_str(),
                "conversion tracked"
            ),
            _ => info!(
                event = event.name(),
                category = event.category(),
                "conversion tracked"
            ),
        }
        Ok(())
    }
}
