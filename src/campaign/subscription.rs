use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::campaign::CampaignService;
use crate::store::ChangeSignal;
use crate::types::CampaignStats;

/// Live statistics subscription. Owns the change-feed receiver through its
/// task; the task is aborted once, on `unsubscribe` or on drop.
#[derive(Debug)]
pub struct StatsSubscription {
    task: Option<JoinHandle<()>>,
}

impl StatsSubscription {
    pub(crate) fn spawn<F>(
        service: CampaignService,
        changes: broadcast::Receiver<ChangeSignal>,
        callback: F,
    ) -> Self
    where
        F: Fn(CampaignStats) + Send + Sync + 'static,
    {
        let task = tokio::spawn(deliver_updates(service, changes, callback));
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("stats subscription released");
        }
    }
}

impl Drop for StatsSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

async fn deliver_updates<F>(
    service: CampaignService,
    mut changes: broadcast::Receiver<ChangeSignal>,
    callback: F,
) where
    F: Fn(CampaignStats) + Send + Sync + 'static,
{
    loop {
        match changes.recv().await {
            Ok(signal) => debug!(table = signal.record_set.table(), "change received"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "change feed lagged, refreshing"),
            Err(RecvError::Closed) => break,
        }
        // A burst of inserts collapses into one re-query.
        let mut closed = false;
        loop {
            match changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    closed = true;
                    break;
                }
            }
        }
        if let Some(stats) = service.get_campaign_stats().await {
            callback(stats);
        }
        if closed {
            break;
        }
    }
}
