pub mod migrations;
pub mod polling;
pub mod rest;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{StorageBackend, StorageConfig};
use crate::store::polling::PollingFeed;
use crate::store::rest::RestStore;
use crate::store::sqlite::SqliteStore;
use crate::types::{
    Audience, EmailCampaignLog, NewPledge, NewSignature, Pledge, Recipient, Signature, StatsConfig,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Which signature rows count toward the public petition total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignatureCountFilter {
    /// Only rows whose signer agreed to be counted on the petition.
    #[default]
    PetitionConsent,
    /// Every signature row, including pledge-only submissions.
    All,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordSet {
    Signatures,
    Pledges,
}

impl RecordSet {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Signatures => "signatures",
            Self::Pledges => "pledges",
        }
    }
}

/// "Something changed" notice. The row payload is not carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSignal {
    pub record_set: RecordSet,
}

pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_signature(&self, signature: &NewSignature) -> Result<Signature, StoreError>;
    async fn insert_pledge(&self, pledge: &NewPledge) -> Result<Pledge, StoreError>;
    async fn count_signatures(&self, filter: SignatureCountFilter) -> Result<u64, StoreError>;
    async fn count_pledges(&self) -> Result<u64, StoreError>;
    async fn sum_pledge_cents(&self) -> Result<i64, StoreError>;
    async fn last_activity(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
    async fn stats_config(&self) -> Result<Option<StatsConfig>, StoreError>;
    async fn list_signatures(&self, filter: SignatureCountFilter)
        -> Result<Vec<Signature>, StoreError>;
    async fn list_recipients(&self, audience: Audience) -> Result<Vec<Recipient>, StoreError>;
    async fn record_email_campaign(&self, log: &EmailCampaignLog) -> Result<(), StoreError>;
}

/// Push-based change notifications for the signature and pledge record sets.
///
/// Dropping the returned receiver releases the subscription.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ChangeSignal>;
}

#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn CampaignStore>,
    pub feed: Arc<dyn ChangeFeed>,
    local: Option<Arc<SqliteStore>>,
}

impl Backend {
    pub fn from_sqlite(store: Arc<SqliteStore>) -> Self {
        Self {
            store: store.clone(),
            feed: store.clone(),
            local: Some(store),
        }
    }

    /// Direct handle to the local database, when the backend is SQLite.
    pub fn local(&self) -> Option<&Arc<SqliteStore>> {
        self.local.as_ref()
    }
}

/// Opens the configured persistence backend. The REST backend spawns its
/// polling change feed, so this must run inside a tokio runtime.
pub fn open_backend(config: &StorageConfig) -> Result<Backend> {
    match config.backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(&config.resolved_db_path())?;
            Ok(Backend::from_sqlite(Arc::new(store)))
        }
        StorageBackend::Rest => {
            if config.rest_url.trim().is_empty() {
                return Err(anyhow!("storage.rest_url is required for the rest backend"));
            }
            let store: Arc<dyn CampaignStore> =
                Arc::new(RestStore::new(&config.rest_url, &config.rest_key));
            let feed = PollingFeed::spawn(
                store.clone(),
                Duration::from_secs(config.poll_interval_secs.max(1)),
            );
            Ok(Backend {
                store,
                feed: Arc::new(feed),
                local: None,
            })
        }
    }
}
