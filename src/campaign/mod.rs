pub mod subscription;
pub mod tier;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::notify::{LogNotifier, SignatureNotifier};
use crate::store::{CampaignStore, ChangeFeed, SignatureCountFilter, StoreError};
use crate::tracking::{AnalyticsEvent, EventTracker, LogTracker};
use crate::types::{
    dollars_to_cents, CampaignStats, NewPledge, NewSignature, PledgeId, SignatureId, StatsConfig,
    DEFAULT_PLEDGE_GOAL_CENTS, DEFAULT_SIGNATURE_GOAL, MAX_PLEDGE_DOLLARS,
};

pub use subscription::StatsSubscription;
pub use tier::{pledge_tier, PledgeTier, DEFAULT_TIER, PLEDGE_TIERS};

pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{0}")]
    Remote(String),
    #[error("request timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("pledge amount {0} is outside the accepted range")]
    InvalidAmount(f64),
}

impl SubmissionError {
    /// Text safe to show the submitter; blank store errors read as the
    /// generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote(message) if !message.trim().is_empty() => message.trim().to_string(),
            Self::Remote(_) => GENERIC_FAILURE_MESSAGE.to_string(),
            Self::TimedOut(_) => "The request timed out. Please try again.".to_string(),
            Self::InvalidAmount(_) => {
                "Please enter a pledge amount between $0.01 and $10,000,000.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PledgeRequest {
    pub amount_dollars: f64,
    pub tier: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub count_filter: SignatureCountFilter,
    pub default_goals: StatsConfig,
    pub request_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            count_filter: SignatureCountFilter::default(),
            default_goals: StatsConfig {
                signature_goal: DEFAULT_SIGNATURE_GOAL,
                pledge_goal_cents: DEFAULT_PLEDGE_GOAL_CENTS,
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            count_filter: config.campaign.count_filter,
            default_goals: StatsConfig {
                signature_goal: config.campaign.default_signature_goal,
                pledge_goal_cents: config.campaign.default_pledge_goal_cents(),
            },
            request_timeout: config.campaign.request_timeout(),
        }
    }
}

/// Every read and write of petition and pledge data goes through here.
/// Remote failures come back as values; nothing panics or leaks a
/// transport error type to callers.
#[derive(Clone)]
pub struct CampaignService {
    store: Arc<dyn CampaignStore>,
    feed: Arc<dyn ChangeFeed>,
    notifier: Arc<dyn SignatureNotifier>,
    tracker: Arc<dyn EventTracker>,
    settings: ServiceSettings,
}

impl CampaignService {
    pub fn new(store: Arc<dyn CampaignStore>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            store,
            feed,
            notifier: Arc::new(LogNotifier),
            tracker: Arc::new(LogTracker),
            settings: ServiceSettings::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SignatureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn EventTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    pub async fn submit_signature(
        &self,
        signature: &NewSignature,
    ) -> Result<SignatureId, SubmissionError> {
        let created = self
            .bounded(self.store.insert_signature(signature))
            .await
            .map_err(|err| {
                error!("error submitting signature: {err}");
                err
            })?;

        let notifier = self.notifier.clone();
        let record = created.clone();
        tokio::spawn(async move {
            if let Err(error) = notifier.signature_created(&record).await {
                warn!(signature_id = record.id, "signature notification failed: {error}");
            }
        });

        if signature.consent_petition {
            self.track(AnalyticsEvent::PetitionSignature);
        }
        if signature.consent_updates {
            self.track(AnalyticsEvent::NewsletterSignup);
        }
        Ok(created.id)
    }

    /// Records a pledge against an already persisted signature.
    pub async fn submit_pledge(
        &self,
        signature_id: SignatureId,
        request: &PledgeRequest,
    ) -> Result<PledgeId, SubmissionError> {
        let amount = request.amount_dollars;
        if !amount.is_finite() || amount <= 0.0 || amount > MAX_PLEDGE_DOLLARS {
            return Err(SubmissionError::InvalidAmount(amount));
        }
        let pledge = NewPledge {
            signature_id,
            amount_cents: dollars_to_cents(request.amount_dollars),
            pledge_tier: request.tier.clone(),
        };
        let created = self
            .bounded(self.store.insert_pledge(&pledge))
            .await
            .map_err(|err| {
                error!(signature_id, "error submitting pledge: {err}");
                err
            })?;

        self.track(AnalyticsEvent::PledgeCommitment {
            value: request.amount_dollars,
            currency: "CAD".to_string(),
        });
        Ok(created.id)
    }

    /// Current totals and goals, or `None` when the counters could not be
    /// read. A missing or unreadable goal row falls back to the defaults.
    pub async fn get_campaign_stats(&self) -> Option<CampaignStats> {
        let filter = self.settings.count_filter;
        let counters = self
            .bounded(async {
                tokio::try_join!(
                    self.store.count_signatures(filter),
                    self.store.count_pledges(),
                    self.store.sum_pledge_cents(),
                    self.store.last_activity(),
                )
            })
            .await;
        let (signatures, pledges, pledge_amount_cents, last_updated) = match counters {
            Ok(counters) => counters,
            Err(err) => {
                error!("error fetching campaign stats: {err}");
                return None;
            }
        };

        let goals = match self.bounded(self.store.stats_config()).await {
            Ok(Some(goals)) => goals,
            Ok(None) => {
                debug!("no statistics configuration row, using default goals");
                self.settings.default_goals
            }
            Err(err) => {
                warn!("could not read campaign goals, using defaults: {err}");
                self.settings.default_goals
            }
        };

        Some(CampaignStats {
            signatures,
            pledges,
            pledge_amount_cents,
            signature_goal: goals.signature_goal,
            pledge_goal_cents: goals.pledge_goal_cents,
            last_updated,
        })
    }

    /// Calls `callback` with fresh totals whenever signatures or pledges
    /// change. Drop or `unsubscribe` the handle to stop.
    pub fn subscribe_to_stats<F>(&self, callback: F) -> StatsSubscription
    where
        F: Fn(CampaignStats) + Send + Sync + 'static,
    {
        StatsSubscription::spawn(self.clone(), self.feed.subscribe(), callback)
    }

    pub fn pledge_tier(&self, amount_dollars: f64) -> PledgeTier {
        pledge_tier(amount_dollars)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, SubmissionError> {
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SubmissionError::Remote(store_message(err))),
            Err(_) => Err(SubmissionError::TimedOut(self.settings.request_timeout)),
        }
    }

    fn track(&self, event: AnalyticsEvent) {
        if let Err(error) = self.tracker.track(&event) {
            debug!(event = event.name(), "analytics tracking failed: {error}");
        }
    }
}

fn store_message(err: StoreError) -> String {
    match err {
        StoreError::Rejected(message) | StoreError::Malformed(message) => message,
        other => other.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use tokio_test::{assert_err, assert_ok};

    use super::testing::{petition_signature, FlakyStore};
    use super::*;

    struct FailingTracker;

    impl EventTracker for FailingTracker {
        fn track(&self, _event: &AnalyticsEvent) -> anyhow::Result<()> {
            anyhow::bail!("analytics endpoint unreachable")
        }
    }

    #[tokio::test]
    async fn signature_submission_increments_the_count_by_one() {
        let store = FlakyStore::new();
        let service = store.service();
        let before = service.get_campaign_stats().await.expect("stats");

        let id = assert_ok!(service.submit_signature(&petition_signature("Ada")).await);
        assert!(id > 0);

        let after = service.get_campaign_stats().await.expect("stats");
        assert_eq!(after.signatures, before.signatures + 1);
    }

    #[tokio::test]
    async fn pledge_dollars_are_stored_as_cents() {
        let store = FlakyStore::new();
        let service = store.service();
        let signature_id = assert_ok!(service.submit_signature(&petition_signature("Bo")).await);
        assert_ok!(
            service
                .submit_pledge(
                    signature_id,
                    &PledgeRequest {
                        amount_dollars: 100.0,
                        tier: Some("Advocate".to_string()),
                    },
                )
                .await
        );

        let stats = service.get_campaign_stats().await.expect("stats");
        assert_eq!(stats.pledge_amount_cents, 10_000);
        assert_eq!(stats.pledge_amount_dollars(), 100.0);
        assert_eq!(stats.pledges, 1);
    }

    #[tokio::test]
    async fn out_of_range_pledges_are_refused_before_the_store() {
        let store = FlakyStore::new();
        let service = store.service();
        let signature_id = assert_ok!(service.submit_signature(&petition_signature("Cy")).await);
        for amount_dollars in [5e16, 0.0, f64::INFINITY] {
            let err = assert_err!(
                service
                    .submit_pledge(
                        signature_id,
                        &PledgeRequest {
                            amount_dollars,
                            tier: None,
                        },
                    )
                    .await
            );
            assert!(matches!(err, SubmissionError::InvalidAmount(_)));
        }
        assert_eq!(store.count_pledges().await.expect("count"), 0);
        let stats = service.get_campaign_stats().await.expect("stats stay readable");
        assert_eq!(stats.pledge_amount_cents, 0);
    }

    #[tokio::test]
    async fn missing_goal_row_falls_back_to_defaults() {
        let store = FlakyStore::new();
        let stats = store.service().get_campaign_stats().await.expect("stats");
        assert_eq!(stats.signature_goal, 2_000);
        assert_eq!(stats.pledge_goal_cents, 15_000_000);
    }

    #[tokio::test]
    async fn unreadable_goal_row_still_returns_counts() {
        let store = FlakyStore::new();
        store.fail_config.store(true, Ordering::SeqCst);
        let service = store.service();
        assert_ok!(service.submit_signature(&petition_signature("Cy")).await);
        let stats = service.get_campaign_stats().await.expect("stats");
        assert_eq!(stats.signatures, 1);
        assert_eq!(stats.signature_goal, 2_000);
    }

    #[tokio::test]
    async fn configured_goals_override_defaults() {
        let store = FlakyStore::new();
        store
            .inner
            .set_stats_config(&StatsConfig {
                signature_goal: 5_000,
                pledge_goal_cents: 50_000_000,
            })
            .expect("set goals");
        let stats = store.service().get_campaign_stats().await.expect("stats");
        assert_eq!(stats.signature_goal, 5_000);
        assert_eq!(stats.pledge_goal_cents, 50_000_000);
    }

    #[tokio::test]
    async fn failed_counts_yield_none() {
        let store = FlakyStore::new();
        store.fail_counts.store(true, Ordering::SeqCst);
        assert!(store.service().get_campaign_stats().await.is_none());
    }

    #[tokio::test]
    async fn repeated_reads_without_writes_are_identical() {
        let store = FlakyStore::new();
        let service = store.service();
        assert_ok!(service.submit_signature(&petition_signature("Di")).await);
        let first = service.get_campaign_stats().await;
        let second = service.get_campaign_stats().await;
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn count_filter_controls_pledge_only_rows() {
        let store = FlakyStore::new();
        let service = store.service();
        assert_ok!(service.submit_signature(&petition_signature("Ed")).await);
        let mut pledge_only = petition_signature("Flo");
        pledge_only.consent_petition = false;
        assert_ok!(service.submit_signature(&pledge_only).await);

        let filtered = service.get_campaign_stats().await.expect("stats");
        assert_eq!(filtered.signatures, 1);

        let unfiltered = service
            .clone()
            .with_settings(ServiceSettings {
                count_filter: SignatureCountFilter::All,
                ..ServiceSettings::default()
            })
            .get_campaign_stats()
            .await
            .expect("stats");
        assert_eq!(unfiltered.signatures, 2);
    }

    #[tokio::test]
    async fn store_errors_surface_with_their_message() {
        let store = FlakyStore::new();
        store.fail_signatures.store(true, Ordering::SeqCst);
        let err = assert_err!(store.service().submit_signature(&petition_signature("Gus")).await);
        assert_eq!(err.user_message(), "simulated signature failure");
    }

    #[tokio::test]
    async fn blank_errors_read_as_generic_failure() {
        assert_eq!(
            SubmissionError::Remote("  ".to_string()).user_message(),
            GENERIC_FAILURE_MESSAGE
        );
    }

    #[tokio::test]
    async fn hung_store_times_out() {
        let store = FlakyStore::new();
        store.hang.store(true, Ordering::SeqCst);
        let service = store.service().with_settings(ServiceSettings {
            request_timeout: Duration::from_millis(20),
            ..ServiceSettings::default()
        });
        let err = assert_err!(service.submit_signature(&petition_signature("Hal")).await);
        assert!(matches!(err, SubmissionError::TimedOut(_)));
        assert!(service.get_campaign_stats().await.is_none());
    }

    #[tokio::test]
    async fn tracker_failures_never_fail_a_submission() {
        let store = FlakyStore::new();
        let service = store.service().with_tracker(Arc::new(FailingTracker));
        let mut signature = petition_signature("Ivy");
        signature.consent_updates = true;
        assert_ok!(service.submit_signature(&signature).await);
    }

    #[tokio::test]
    async fn subscription_delivers_fresh_stats_until_released() {
        let store = FlakyStore::new();
        let service = store.service();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = service.subscribe_to_stats(move |stats| {
            sink.lock().expect("lock").push(stats.signatures);
        });
        assert!(subscription.is_active());

        assert_ok!(service.submit_signature(&petition_signature("Jo")).await);
        for _ in 0..100 {
            if !seen.lock().expect("lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().expect("lock").last(), Some(&1));

        subscription.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let delivered = seen.lock().expect("lock").len();
        assert_ok!(service.submit_signature(&petition_signature("Kit")).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().expect("lock").len(), delivered);
    }
}
