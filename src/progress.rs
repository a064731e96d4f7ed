//! Display-side campaign counters: seeded values, the historical baseline
//! offset, and live replacement from the stats subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info};

use crate::campaign::{CampaignService, StatsSubscription};
use crate::config::Config;
use crate::types::{cents_to_dollars, CampaignStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressData {
    pub signatures: u64,
    pub signature_goal: u64,
    pub pledge_amount_cents: i64,
    pub pledge_goal_cents: i64,
    pub emails: u64,
    pub email_goal: u64,
}

impl ProgressData {
    /// The offset stands for offline signatures gathered before the site
    /// existed; the email counter tracks the same total.
    pub fn from_stats(stats: &CampaignStats, baseline_offset: u64, email_goal: u64) -> Self {
        let signatures = stats.signatures.saturating_add(baseline_offset);
        Self {
            signatures,
            signature_goal: stats.signature_goal,
            pledge_amount_cents: stats.pledge_amount_cents,
            pledge_goal_cents: stats.pledge_goal_cents,
            emails: signatures,
            email_goal,
        }
    }

    pub fn signature_percent(&self) -> f64 {
        percent_of_goal(self.signatures as f64, self.signature_goal as f64)
    }

    pub fn pledge_percent(&self) -> f64 {
        percent_of_goal(self.pledge_amount_cents as f64, self.pledge_goal_cents as f64)
    }

    pub fn email_percent(&self) -> f64 {
        percent_of_goal(self.emails as f64, self.email_goal as f64)
    }

    pub fn pledge_amount_dollars(&self) -> f64 {
        cents_to_dollars(self.pledge_amount_cents)
    }

    pub fn pledge_goal_dollars(&self) -> f64 {
        cents_to_dollars(self.pledge_goal_cents)
    }
}

/// Share of `goal` reached, capped at 100. Non-positive goals read as 0.
pub fn percent_of_goal(current: f64, goal: f64) -> f64 {
    if !(goal > 0.0) || !current.is_finite() {
        return 0.0;
    }
    (current / goal * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSettings {
    pub baseline_signature_offset: u64,
    pub email_goal: u64,
    pub seed: ProgressData,
}

impl ProgressSettings {
    pub fn from_config(config: &Config) -> Self {
        let progress = &config.progress;
        Self {
            baseline_signature_offset: config.campaign.baseline_signature_offset,
            email_goal: progress.email_goal,
            seed: ProgressData {
                signatures: progress.signatures,
                signature_goal: progress.signature_goal,
                pledge_amount_cents: progress.pledge_amount_cents(),
                pledge_goal_cents: progress.pledge_goal_cents(),
                emails: progress.emails,
                email_goal: progress.email_goal,
            },
        }
    }
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Owns the displayed counters. Readers see either the previous snapshot or
/// the next one, never a mix.
///
/// Every pushed update bumps `pushes` while holding the write lock. A refresh
/// that started before the latest push discards its result.
pub struct ProgressTracker {
    service: CampaignService,
    settings: ProgressSettings,
    data: Arc<RwLock<ProgressData>>,
    pushes: Arc<AtomicU64>,
    subscription: Option<StatsSubscription>,
}

impl ProgressTracker {
    pub fn new(service: CampaignService, settings: ProgressSettings) -> Self {
        let data = Arc::new(RwLock::new(settings.seed.clone()));
        Self {
            service,
            settings,
            data,
            pushes: Arc::new(AtomicU64::new(0)),
            subscription: None,
        }
    }

    /// Subscribes to live updates, then loads the current totals. Calling
    /// it again while mounted only refreshes.
    pub async fn mount(&mut self) {
        if self.subscription.is_none() {
            let data = self.data.clone();
            let pushes = self.pushes.clone();
            let offset = self.settings.baseline_signature_offset;
            let email_goal = self.settings.email_goal;
            self.subscription = Some(self.service.subscribe_to_stats(move |stats| {
                let next = ProgressData::from_stats(&stats, offset, email_goal);
                debug!(signatures = next.signatures, "progress updated from change feed");
                let mut current = write(&data);
                pushes.fetch_add(1, Ordering::SeqCst);
                *current = next;
            }));
        }
        self.refresh().await;
    }

    /// Re-reads the totals. Returns false and keeps the current values when
    /// the read fails. A pushed update that lands while the read is in
    /// flight wins over the read.
    pub async fn refresh(&self) -> bool {
        let started_after = self.pushes.load(Ordering::SeqCst);
        match self.service.get_campaign_stats().await {
            Some(stats) => {
                let next = ProgressData::from_stats(
                    &stats,
                    self.settings.baseline_signature_offset,
                    self.settings.email_goal,
                );
                let mut current = write(&self.data);
                if self.pushes.load(Ordering::SeqCst) != started_after {
                    debug!("newer pushed progress landed during refresh, dropping stale read");
                    return true;
                }
                info!(
                    signatures = next.signatures,
                    pledge_cents = next.pledge_amount_cents,
                    "progress loaded"
                );
                *current = next;
                true
            }
            None => {
                debug!("stats unavailable, keeping previous progress values");
                false
            }
        }
    }

    pub fn snapshot(&self) -> ProgressData {
        read(&self.data).clone()
    }

    pub fn handle(&self) -> ProgressHandle {
        ProgressHandle {
            data: self.data.clone(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Read-only view of a tracker's counters for other tasks.
#[derive(Clone)]
pub struct ProgressHandle {
    data: Arc<RwLock<ProgressData>>,
}

impl ProgressHandle {
    pub fn snapshot(&self) -> ProgressData {
        read(&self.data).clone()
    }
}

fn read(lock: &RwLock<ProgressData>) -> RwLockReadGuard<'_, ProgressData> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<ProgressData>) -> RwLockWriteGuard<'_, ProgressData> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::campaign::testing::{petition_signature, FlakyStore};

    fn stats(signatures: u64) -> CampaignStats {
        CampaignStats {
            signatures,
            pledges: 0,
            pledge_amount_cents: 0,
            signature_goal: 2_000,
            pledge_goal_cents: 15_000_000,
            last_updated: None,
        }
    }

    #[test]
    fn baseline_offset_is_added_to_raw_count() {
        let data = ProgressData::from_stats(&stats(7), 400, 1_000);
        assert_eq!(data.signatures, 407);
        assert_eq!(data.emails, 407);
        assert_eq!(data.email_goal, 1_000);
    }

    #[test]
    fn percent_is_capped_at_one_hundred() {
        assert_eq!(percent_of_goal(2_500.0, 2_000.0), 100.0);
        assert_eq!(percent_of_goal(500.0, 2_000.0), 25.0);
        assert_eq!(percent_of_goal(10.0, 0.0), 0.0);
        assert_eq!(percent_of_goal(-5.0, 100.0), 0.0);
    }

    #[tokio::test]
    async fn failed_load_keeps_seeded_values() {
        let store = FlakyStore::new();
        store.fail_counts.store(true, Ordering::SeqCst);
        let settings = ProgressSettings::default();
        let mut tracker = ProgressTracker::new(store.service(), settings.clone());
        tracker.mount().await;
        assert_eq!(tracker.snapshot(), settings.seed);
        assert_eq!(tracker.snapshot().signatures, 407);
        tracker.unmount();
    }

    #[tokio::test]
    async fn mount_loads_and_pushes_replace_state() {
        let store = FlakyStore::new();
        let service = store.service();
        let mut tracker = ProgressTracker::new(service.clone(), ProgressSettings::default());
        tracker.mount().await;
        assert!(tracker.is_mounted());
        assert_eq!(tracker.snapshot().signatures, 400);

        service
            .submit_signature(&petition_signature("Lu"))
            .await
            .expect("submit");
        let handle = tracker.handle();
        for _ in 0..100 {
            if handle.snapshot().signatures == 401 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.snapshot().signatures, 401);

        tracker.unmount();
        assert!(!tracker.is_mounted());
        service
            .submit_signature(&petition_signature("Mo"))
            .await
            .expect("submit");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.snapshot().signatures, 401);
        assert!(tracker.refresh().await);
        assert_eq!(tracker.snapshot().signatures, 402);
    }

    #[tokio::test]
    async fn slow_initial_load_does_not_overwrite_a_newer_push() {
        let store = FlakyStore::new();
        store.slow_next_count_ms.store(200, Ordering::SeqCst);
        let service = store.service();
        let mut tracker = ProgressTracker::new(service.clone(), ProgressSettings::default());

        let writer = service.clone();
        let insert = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer
                .submit_signature(&petition_signature("Nia"))
                .await
                .expect("submit");
        });
        tracker.mount().await;
        insert.await.expect("insert task");

        let handle = tracker.handle();
        for _ in 0..100 {
            if handle.snapshot().signatures == 401 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.snapshot().signatures, 401);
        tracker.unmount();
    }
}
