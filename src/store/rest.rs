use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{read_body, HttpFailure, HTTP_CLIENT};
use crate::store::{CampaignStore, SignatureCountFilter, StoreError};
use crate::types::{
    Audience, EmailCampaignLog, NewPledge, NewSignature, Pledge, Recipient, Signature,
    StatsConfig, DEFAULT_PLEDGE_GOAL_CENTS, DEFAULT_SIGNATURE_GOAL, MAJOR_PLEDGE_CENTS,
};

const STATS_TABLE: &str = "campaign_stats";
const PAGE_SIZE: usize = 1_000;

/// Hosted relational store reached over its PostgREST interface
/// (`<project>/rest/v1/<table>`).
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SignatureRow {
    id: i64,
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    email: String,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    consent_petition: bool,
    #[serde(default)]
    consent_updates: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<SignatureRow> for Signature {
    fn from(row: SignatureRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name.unwrap_or_default(),
            email: row.email,
            postal_code: row.postal_code.unwrap_or_default(),
            consent_petition: row.consent_petition,
            consent_updates: row.consent_updates,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Serialize)]
struct PledgeBody<'a> {
    signature_id: i64,
    amount: i64,
    pledge_tier: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PledgeRow {
    id: i64,
    signature_id: i64,
    amount: i64,
    #[serde(default)]
    pledge_tier: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AmountRow {
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct PledgerRow {
    signature_id: i64,
}

#[derive(Debug, Deserialize)]
struct TimestampRow {
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GoalRow {
    #[serde(default)]
    signature_goal: Option<f64>,
    #[serde(default)]
    pledge_goal: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RecipientRow {
    id: i64,
    email: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CampaignLogBody<'a> {
    subject: &'a str,
    audience_filter: &'a str,
    recipients_count: u64,
    sent_count: u64,
    failed_count: u64,
    sent_at: DateTime<Utc>,
}

impl RestStore {
    pub fn new(project_url: &str, api_key: &str) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            base_url: format!("{}/rest/v1", project_url.trim().trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, StoreError> {
        let response = request.send().await?;
        read_body(response).await.map_err(store_error)
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let body = self
            .send(self.request(Method::GET, table).query(query))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Reads every matching row, following offset pagination past the
    /// server-side row cap.
    async fn fetch_all_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut page_query = query.to_vec();
            page_query.push(("limit", PAGE_SIZE.to_string()));
            page_query.push(("offset", offset.to_string()));
            let page: Vec<T> = self.fetch_rows(table, &page_query).await?;
            let fetched = page.len();
            out.extend(page);
            if fetched < PAGE_SIZE {
                return Ok(out);
            }
            offset += fetched;
        }
    }

    async fn count(&self, table: &str, query: &[(&str, String)]) -> Result<u64, StoreError> {
        let mut full_query = query.to_vec();
        full_query.push(("select", "id".to_string()));
        full_query.push(("limit", "1".to_string()));
        let response = self
            .request(Method::GET, table)
            .header("Prefer", "count=exact")
            .query(&full_query)
            .send()
            .await?;
        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        read_body(response).await.map_err(store_error)?;
        let range = range.ok_or_else(|| {
            StoreError::Malformed(format!("count on {table} returned no Content-Range header"))
        })?;
        parse_content_range_total(&range).ok_or_else(|| {
            StoreError::Malformed(format!("unparseable Content-Range on {table}: {range}"))
        })
    }

    async fn insert_returning<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let text = self
            .send(
                self.request(Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .await?;
        let mut rows: Vec<T> = serde_json::from_str(&text)?;
        if rows.is_empty() {
            return Err(StoreError::Malformed(format!(
                "insert into {table} returned no rows"
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn newest_created_at(&self, table: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows: Vec<TimestampRow> = self
            .fetch_rows(
                table,
                &[
                    ("select", "created_at".to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.created_at))
    }
}

#[async_trait]
impl CampaignStore for RestStore {
    async fn insert_signature(&self, signature: &NewSignature) -> Result<Signature, StoreError> {
        let row: SignatureRow = self
            .insert_returning("signatures", std::slice::from_ref(signature))
            .await?;
        debug!(signature_id = row.id, "signature row created");
        Ok(row.into())
    }

    async fn insert_pledge(&self, pledge: &NewPledge) -> Result<Pledge, StoreError> {
        let body = [PledgeBody {
            signature_id: pledge.signature_id,
            amount: pledge.amount_cents,
            pledge_tier: pledge.pledge_tier.as_deref(),
        }];
        let row: PledgeRow = self.insert_returning("pledges", &body).await?;
        Ok(Pledge {
            id: row.id,
            signature_id: row.signature_id,
            amount_cents: row.amount,
            pledge_tier: row.pledge_tier,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        })
    }

    async fn count_signatures(&self, filter: SignatureCountFilter) -> Result<u64, StoreError> {
        match filter {
            SignatureCountFilter::PetitionConsent => {
                self.count("signatures", &[("consent_petition", "eq.true".to_string())])
                    .await
            }
            SignatureCountFilter::All => self.count("signatures", &[]).await,
        }
    }

    async fn count_pledges(&self) -> Result<u64, StoreError> {
        self.count("pledges", &[]).await
    }

    async fn sum_pledge_cents(&self) -> Result<i64, StoreError> {
        let rows: Vec<AmountRow> = self
            .fetch_all_rows(
                "pledges",
                &[
                    ("select", "amount".to_string()),
                    ("order", "id.asc".to_string()),
                ],
            )
            .await?;
        Ok(total_cents(&rows))
    }

    async fn last_activity(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let signatures = self.newest_created_at("signatures").await?;
        let pledges = self.newest_created_at("pledges").await?;
        Ok(signatures.max(pledges))
    }

    async fn stats_config(&self) -> Result<Option<StatsConfig>, StoreError> {
        let rows: Vec<GoalRow> = self
            .fetch_rows(
                STATS_TABLE,
                &[
                    ("select", "signature_goal,pledge_goal".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(goal_row_to_config))
    }

    async fn list_signatures(
        &self,
        filter: SignatureCountFilter,
    ) -> Result<Vec<Signature>, StoreError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "id.asc".to_string()),
        ];
        if filter == SignatureCountFilter::PetitionConsent {
            query.push(("consent_petition", "eq.true".to_string()));
        }
        let rows: Vec<SignatureRow> = self.fetch_all_rows("signatures", &query).await?;
        Ok(rows.into_iter().map(Signature::from).collect())
    }

    async fn list_recipients(&self, audience: Audience) -> Result<Vec<Recipient>, StoreError> {
        let pledger_ids = match audience {
            Audience::All => None,
            Audience::Pledgers => Some(
                self.pledger_ids(&[("select", "signature_id".to_string())])
                    .await?,
            ),
            Audience::MajorPledgers => Some(
                self.pledger_ids(&[
                    ("select", "signature_id".to_string()),
                    ("amount", format!("gte.{MAJOR_PLEDGE_CENTS}")),
                ])
                .await?,
            ),
        };

        let rows: Vec<RecipientRow> = self
            .fetch_all_rows(
                "signatures",
                &[
                    ("select", "id,email,first_name,last_name".to_string()),
                    ("consent_updates", "eq.true".to_string()),
                    ("order", "id.asc".to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                pledger_ids
                    .as_ref()
                    .map(|ids| ids.contains(&row.id))
                    .unwrap_or(true)
            })
            .map(|row| Recipient {
                email: row.email,
                first_name: row.first_name.unwrap_or_default(),
                last_name: row.last_name.unwrap_or_default(),
            })
            .collect())
    }

    async fn record_email_campaign(&self, log: &EmailCampaignLog) -> Result<(), StoreError> {
        let body = CampaignLogBody {
            subject: &log.subject,
            audience_filter: log.audience.as_slug(),
            recipients_count: log.recipients_count,
            sent_count: log.sent_count,
            failed_count: log.failed_count,
            sent_at: log.sent_at,
        };
        self.send(
            self.request(Method::POST, "email_campaigns")
                .header("Prefer", "return=minimal")
                .json(&body),
        )
        .await?;
        Ok(())
    }
}

impl RestStore {
    async fn pledger_ids(&self, query: &[(&str, String)]) -> Result<BTreeSet<i64>, StoreError> {
        let rows: Vec<PledgerRow> = self.fetch_all_rows("pledges", query).await?;
        Ok(rows.into_iter().map(|row| row.signature_id).collect())
    }
}

fn store_error(failure: HttpFailure) -> StoreError {
    match failure {
        HttpFailure::Transport(error) => StoreError::Http(error),
        HttpFailure::Status { status, message } => {
            StoreError::Rejected(format!("{message} (HTTP {status})"))
        }
    }
}

fn goal_row_to_config(row: GoalRow) -> StatsConfig {
    StatsConfig {
        signature_goal: row
            .signature_goal
            .filter(|goal| goal.is_finite() && *goal > 0.0)
            .map(|goal| goal.round() as u64)
            .unwrap_or(DEFAULT_SIGNATURE_GOAL),
        pledge_goal_cents: row
            .pledge_goal
            .filter(|goal| goal.is_finite() && *goal > 0.0)
            .map(|goal| goal.round() as i64)
            .unwrap_or(DEFAULT_PLEDGE_GOAL_CENTS),
    }
}

fn total_cents(rows: &[AmountRow]) -> i64 {
    rows.iter()
        .fold(0i64, |total, row| total.saturating_add(row.amount))
}

/// Total from a `Content-Range` header such as `0-0/42` or `*/0`.
pub fn parse_content_range_total(raw: &str) -> Option<u64> {
    let (_, total) = raw.trim().rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range_totals() {
        assert_eq!(parse_content_range_total("0-0/42"), Some(42));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn pledge_totals_saturate() {
        let rows = vec![
            AmountRow { amount: 2_500 },
            AmountRow { amount: 100_000 },
        ];
        assert_eq!(total_cents(&rows), 102_500);

        let huge = vec![
            AmountRow {
                amount: 5_000_000_000_000_000_000,
            },
            AmountRow {
                amount: 5_000_000_000_000_000_000,
            },
        ];
        assert_eq!(total_cents(&huge), i64::MAX);
    }

    #[test]
    fn signature_rows_tolerate_nulls_and_offsets() {
        let row: SignatureRow = serde_json::from_str(
            r#"{
                "id": 7,
                "first_name": "Ada",
                "last_name": null,
                "email": "ada@example.com",
                "postal_code": null,
                "consent_petition": false,
                "consent_updates": true,
                "created_at": "2025-10-01T12:30:00.123456+00:00"
            }"#,
        )
        .expect("row parses");
        let signature: Signature = row.into();
        assert_eq!(signature.id, 7);
        assert_eq!(signature.last_name, "");
        assert!(signature.consent_updates);
        assert_eq!(signature.created_at.to_rfc3339(), "2025-10-01T12:30:00.123456+00:00");
    }

    #[test]
    fn missing_or_null_goals_fall_back_to_defaults() {
        let config = goal_row_to_config(GoalRow {
            signature_goal: None,
            pledge_goal: Some(50_000_000.0),
        });
        assert_eq!(config.signature_goal, DEFAULT_SIGNATURE_GOAL);
        assert_eq!(config.pledge_goal_cents, 50_000_000);
    }

    #[test]
    fn builds_rest_base_url_from_project_url() {
        let store = RestStore::new("https://abc.supabase.co/", "anon");
        assert_eq!(store.base_url, "https://abc.supabase.co/rest/v1");
    }
}
