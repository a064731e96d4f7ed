use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tokio::sync::broadcast;
use tracing::debug;

use crate::store::migrations::BASE_MIGRATION;
use crate::store::{
    CampaignStore, ChangeFeed, ChangeSignal, RecordSet, SignatureCountFilter, StoreError,
    CHANGE_CHANNEL_CAPACITY,
};
use crate::types::{
    Audience, EmailCampaignLog, NewPledge, NewSignature, Pledge, Recipient, Signature,
    StatsConfig, MAJOR_PLEDGE_CENTS,
};

/// Local persistence backend. Every committed insert is followed by a
/// change signal on the store's broadcast channel.
///
/// Trait calls run their statements on the blocking pool so a slow disk
/// never stalls the async workers.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<ChangeSignal>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        lock(&self.conn)?.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    pub fn set_stats_config(&self, config: &StatsConfig) -> Result<(), StoreError> {
        lock(&self.conn)?.execute(
            r#"
INSERT INTO campaign_config(id, signature_goal, pledge_goal)
VALUES (1, ?1, ?2)
ON CONFLICT(id) DO UPDATE SET
    signature_goal = excluded.signature_goal,
    pledge_goal = excluded.pledge_goal
"#,
            params![config.signature_goal as i64, config.pledge_goal_cents],
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || work(&*lock(&conn)?)).await?
    }

    fn publish(&self, record_set: RecordSet) {
        // No receivers simply means nobody is watching right now.
        if self.changes.send(ChangeSignal { record_set }).is_err() {
            debug!(table = record_set.table(), "change signal dropped, no subscribers");
        }
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::Poisoned)
}

impl ChangeFeed for SqliteStore {
    fn subscribe(&self) -> broadcast::Receiver<ChangeSignal> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl CampaignStore for SqliteStore {
    async fn insert_signature(&self, signature: &NewSignature) -> Result<Signature, StoreError> {
        let created_at = Utc::now();
        let row = signature.clone();
        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    r#"
INSERT INTO signatures(
    first_name, last_name, email, postal_code, consent_petition, consent_updates, created_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
                    params![
                        row.first_name,
                        row.last_name,
                        row.email,
                        row.postal_code,
                        row.consent_petition,
                        row.consent_updates,
                        timestamp(&created_at)
                    ],
                )
                .map_err(constraint_error)?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.publish(RecordSet::Signatures);
        Ok(Signature {
            id,
            first_name: signature.first_name.clone(),
            last_name: signature.last_name.clone(),
            email: signature.email.clone(),
            postal_code: signature.postal_code.clone(),
            consent_petition: signature.consent_petition,
            consent_updates: signature.consent_updates,
            created_at,
        })
    }

    async fn insert_pledge(&self, pledge: &NewPledge) -> Result<Pledge, StoreError> {
        let created_at = Utc::now();
        let row = pledge.clone();
        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    r#"
INSERT INTO pledges(signature_id, amount, pledge_tier, created_at)
VALUES (?1, ?2, ?3, ?4)
"#,
                    params![
                        row.signature_id,
                        row.amount_cents,
                        row.pledge_tier,
                        timestamp(&created_at)
                    ],
                )
                .map_err(constraint_error)?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.publish(RecordSet::Pledges);
        Ok(Pledge {
            id,
            signature_id: pledge.signature_id,
            amount_cents: pledge.amount_cents,
            pledge_tier: pledge.pledge_tier.clone(),
            created_at,
        })
    }

    async fn count_signatures(&self, filter: SignatureCountFilter) -> Result<u64, StoreError> {
        let sql = match filter {
            SignatureCountFilter::PetitionConsent => {
                "SELECT COUNT(*) FROM signatures WHERE consent_petition = 1"
            }
            SignatureCountFilter::All => "SELECT COUNT(*) FROM signatures",
        };
        let count: i64 = self
            .with_conn(move |conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_pledges(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM pledges", [], |row| row.get(0))?)
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn sum_pledge_cents(&self) -> Result<i64, StoreError> {
        // TOTAL() is a float and never overflows; the cast saturates.
        let total: f64 = self
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT TOTAL(amount) FROM pledges", [], |row| row.get(0))?)
            })
            .await?;
        Ok(total.round() as i64)
    }

    async fn last_activity(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let newest: Option<String> = self
            .with_conn(|conn| {
                Ok(conn.query_row(
                    r#"
SELECT MAX(ts) FROM (
    SELECT created_at AS ts FROM signatures
    UNION ALL
    SELECT created_at AS ts FROM pledges
)
"#,
                    [],
                    |row| row.get(0),
                )?)
            })
            .await?;
        Ok(newest.as_deref().and_then(parse_timestamp))
    }

    async fn stats_config(&self) -> Result<Option<StatsConfig>, StoreError> {
        let row = self
            .with_conn(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT signature_goal, pledge_goal FROM campaign_config WHERE id = 1",
                        [],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?)
            })
            .await?;
        Ok(row.map(|(signature_goal, pledge_goal)| StatsConfig {
            signature_goal: signature_goal.max(0) as u64,
            pledge_goal_cents: pledge_goal,
        }))
    }

    async fn list_signatures(
        &self,
        filter: SignatureCountFilter,
    ) -> Result<Vec<Signature>, StoreError> {
        let sql = match filter {
            SignatureCountFilter::PetitionConsent => {
                r#"
SELECT id, first_name, last_name, email, postal_code, consent_petition, consent_updates, created_at
FROM signatures
WHERE consent_petition = 1
ORDER BY id ASC
"#
            }
            SignatureCountFilter::All => {
                r#"
SELECT id, first_name, last_name, email, postal_code, consent_petition, consent_updates, created_at
FROM signatures
ORDER BY id ASC
"#
            }
        };
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([], row_to_signature)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_recipients(&self, audience: Audience) -> Result<Vec<Recipient>, StoreError> {
        let (sql, threshold) = match audience {
            Audience::All => (
                r#"
SELECT email, first_name, last_name FROM signatures
WHERE consent_updates = 1
ORDER BY id ASC
"#,
                None,
            ),
            Audience::Pledgers => (
                r#"
SELECT email, first_name, last_name FROM signatures
WHERE consent_updates = 1
  AND id IN (SELECT signature_id FROM pledges)
ORDER BY id ASC
"#,
                None,
            ),
            Audience::MajorPledgers => (
                r#"
SELECT email, first_name, last_name FROM signatures
WHERE consent_updates = 1
  AND id IN (SELECT signature_id FROM pledges WHERE amount >= ?1)
ORDER BY id ASC
"#,
                Some(MAJOR_PLEDGE_CENTS),
            ),
        };

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = if let Some(threshold) = threshold {
                stmt.query_map(params![threshold], row_to_recipient)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                stmt.query_map([], row_to_recipient)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            Ok(rows)
        })
        .await
    }

    async fn record_email_campaign(&self, log: &EmailCampaignLog) -> Result<(), StoreError> {
        let log = log.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
INSERT INTO email_campaigns(
    subject, audience_filter, recipients_count, sent_count, failed_count, sent_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
                params![
                    log.subject,
                    log.audience.as_slug(),
                    log.recipients_count as i64,
                    log.sent_count as i64,
                    log.failed_count as i64,
                    timestamp(&log.sent_at)
                ],
            )?;
            Ok(())
        })
        .await
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn constraint_error(error: rusqlite::Error) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Rejected(
                message
                    .clone()
                    .unwrap_or_else(|| "constraint violation".to_string()),
            )
        }
        _ => StoreError::Database(error),
    }
}

fn row_to_recipient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recipient> {
    Ok(Recipient {
        email: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
    })
}

fn row_to_signature(row: &rusqlite::Row<'_>) -> rusqlite::Result<Signature> {
    let created_at_raw: String = row.get(7)?;
    Ok(Signature {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        postal_code: row.get(4)?,
        consent_petition: row.get(5)?,
        consent_updates: row.get(6)?,
        created_at: parse_timestamp(&created_at_raw).unwrap_or_else(Utc::now),
    })
}
