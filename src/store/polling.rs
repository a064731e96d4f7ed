use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{
    CampaignStore, ChangeFeed, ChangeSignal, RecordSet, SignatureCountFilter,
    CHANGE_CHANNEL_CAPACITY,
};

/// Change feed for stores without a push channel: polls the row counters and
/// signals whichever record set moved since the previous poll.
pub struct PollingFeed {
    sender: broadcast::Sender<ChangeSignal>,
    task: JoinHandle<()>,
}

impl PollingFeed {
    pub fn spawn(store: Arc<dyn CampaignStore>, interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let task = tokio::spawn(poll_loop(store, sender.clone(), interval));
        Self { sender, task }
    }
}

impl ChangeFeed for PollingFeed {
    fn subscribe(&self) -> broadcast::Receiver<ChangeSignal> {
        self.sender.subscribe()
    }
}

impl Drop for PollingFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counters {
    signatures: u64,
    pledges: u64,
}

async fn read_counters(store: &dyn CampaignStore) -> Option<Counters> {
    let signatures = store.count_signatures(SignatureCountFilter::All).await;
    let pledges = store.count_pledges().await;
    match (signatures, pledges) {
        (Ok(signatures), Ok(pledges)) => Some(Counters {
            signatures,
            pledges,
        }),
        (Err(error), _) | (_, Err(error)) => {
            warn!("change poll failed: {error}");
            None
        }
    }
}

async fn poll_loop(
    store: Arc<dyn CampaignStore>,
    sender: broadcast::Sender<ChangeSignal>,
    interval: Duration,
) {
    let mut previous = read_counters(store.as_ref()).await;
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(current) = read_counters(store.as_ref()).await else {
            continue;
        };
        if let Some(before) = previous {
            if before.signatures != current.signatures {
                let _ = sender.send(ChangeSignal {
                    record_set: RecordSet::Signatures,
                });
            }
            if before.pledges != current.pledges {
                let _ = sender.send(ChangeSignal {
                    record_set: RecordSet::Pledges,
                });
            }
        }
        if previous != Some(current) {
            debug!(
                signatures = current.signatures,
                pledges = current.pledges,
                "polled counters moved"
            );
        }
        previous = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::types::NewSignature;

    #[tokio::test]
    async fn signals_when_polled_counts_move() {
        let sqlite = Arc::new(SqliteStore::open_in_memory().expect("open store"));
        let feed = PollingFeed::spawn(sqlite.clone(), Duration::from_millis(10));
        let mut rx = feed.subscribe();

        tokio::time::sleep(Duration::from_millis(30)).await;
        sqlite
            .insert_signature(&NewSignature {
                first_name: "Ivy".to_string(),
                last_name: "Moss".to_string(),
                email: "ivy@example.com".to_string(),
                postal_code: "V8K 1A1".to_string(),
                consent_petition: true,
                consent_updates: false,
            })
            .await
            .expect("insert");

        let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("signal before timeout")
            .expect("open channel");
        assert_eq!(signal.record_set, RecordSet::Signatures);
    }
}
