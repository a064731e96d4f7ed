use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::SignatureCountFilter;
use crate::types::{dollars_to_cents, CENTS_PER_DOLLAR};

const REDACTED: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub etransfer: EtransferConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub rest_url: String,
    #[serde(default)]
    pub rest_key: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Offline signatures gathered before the online petition existed.
    #[serde(default = "default_baseline_offset")]
    pub baseline_signature_offset: u64,
    #[serde(default = "default_signature_goal")]
    pub default_signature_goal: u64,
    #[serde(default = "default_pledge_goal_dollars")]
    pub default_pledge_goal_dollars: u64,
    #[serde(default)]
    pub count_filter: SignatureCountFilter,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Values shown before the first statistics read lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_seed_signatures")]
    pub signatures: u64,
    #[serde(default = "default_signature_goal")]
    pub signature_goal: u64,
    #[serde(default = "default_seed_pledge_dollars")]
    pub pledge_amount_dollars: u64,
    #[serde(default = "default_pledge_goal_dollars")]
    pub pledge_goal_dollars: u64,
    #[serde(default = "default_seed_emails")]
    pub emails: u64,
    #[serde(default = "default_email_goal")]
    pub email_goal: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default)]
    pub stripe_secret_key: String,
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_donation_description")]
    pub description: String,
    #[serde(default = "default_project")]
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub resend_api_key: String,
    #[serde(default = "default_resend_api_url")]
    pub resend_api_url: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_alert_from_address")]
    pub alert_from_address: String,
    #[serde(default)]
    pub admin_email: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtransferConfig {
    #[serde(default = "default_etransfer_email")]
    pub recipient_email: String,
    #[serde(default = "default_etransfer_recipient")]
    pub recipient_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bearer token guarding admin routes; empty disables them.
    #[serde(default)]
    pub admin_token: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<String>,
    pub rest_url: Option<String>,
    pub baseline_signature_offset: Option<u64>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/arena-campaign/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(rest_url) = overrides.rest_url {
            self.storage.rest_url = rest_url;
            self.storage.backend = StorageBackend::Rest;
        }
        if let Some(offset) = overrides.baseline_signature_offset {
            self.campaign.baseline_signature_offset = offset;
        }
    }

    /// Fills secrets left empty in the file from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fill = |slot: &mut String, key: &str| {
            if slot.trim().is_empty() {
                if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                    *slot = value;
                }
            }
        };
        fill(&mut self.payments.stripe_secret_key, "STRIPE_SECRET_KEY");
        fill(&mut self.notifications.resend_api_key, "RESEND_API_KEY");
        fill(&mut self.notifications.admin_email, "NOTIFICATION_EMAIL");
        fill(&mut self.storage.rest_url, "SUPABASE_URL");
        fill(&mut self.storage.rest_key, "SUPABASE_KEY");
        fill(&mut self.server.admin_token, "ARENA_ADMIN_TOKEN");
    }

    /// Copy safe to print or serve: every secret is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [
            &mut copy.storage.rest_key,
            &mut copy.payments.stripe_secret_key,
            &mut copy.notifications.resend_api_key,
            &mut copy.server.admin_token,
        ] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
        copy
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
backend = "sqlite"
db_path = "~/.local/share/arena-campaign/campaign.db"
rest_url = ""
rest_key = ""
poll_interval_secs = 5

[campaign]
baseline_signature_offset = 400
default_signature_goal = 2000
default_pledge_goal_dollars = 150000
count_filter = "petition_consent"
request_timeout_secs = 15

[progress]
signatures = 407
signature_goal = 2000
pledge_amount_dollars = 34750
pledge_goal_dollars = 150000
emails = 203
email_goal = 1000

[payments]
stripe_secret_key = ""
stripe_api_base = "https://api.stripe.com"
currency = "cad"
description = "Donation to Salt Spring Island Arena Project"
project = "SSI Arena"

[notifications]
resend_api_key = ""
resend_api_url = "https://api.resend.com/emails"
from_address = "Salt Spring Island Arena Campaign <noreply@yourdomain.com>"
alert_from_address = "Petition Alerts <noreply@yourdomain.com>"
admin_email = ""
batch_size = 10
batch_delay_ms = 2000

[etransfer]
recipient_email = "healthylivingssi@gmail.com"
recipient_name = "Healthy Living Salt Spring Island Society"

[server]
admin_token = ""
allowed_origins = ["*"]
"#;
        template.to_string()
    }
}

impl StorageConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.db_path)
    }
}

impl CampaignConfig {
    pub fn default_pledge_goal_cents(&self) -> i64 {
        self.default_pledge_goal_dollars as i64 * CENTS_PER_DOLLAR
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl ProgressConfig {
    pub fn pledge_amount_cents(&self) -> i64 {
        dollars_to_cents(self.pledge_amount_dollars as f64)
    }

    pub fn pledge_goal_cents(&self) -> i64 {
        dollars_to_cents(self.pledge_goal_dollars as f64)
    }
}

impl NotificationsConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
            rest_url: String::new(),
            rest_key: String::new(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            baseline_signature_offset: default_baseline_offset(),
            default_signature_goal: default_signature_goal(),
            default_pledge_goal_dollars: default_pledge_goal_dollars(),
            count_filter: SignatureCountFilter::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            signatures: default_seed_signatures(),
            signature_goal: default_signature_goal(),
            pledge_amount_dollars: default_seed_pledge_dollars(),
            pledge_goal_dollars: default_pledge_goal_dollars(),
            emails: default_seed_emails(),
            email_goal: default_email_goal(),
        }
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: String::new(),
            stripe_api_base: default_stripe_api_base(),
            currency: default_currency(),
            description: default_donation_description(),
            project: default_project(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            resend_api_key: String::new(),
            resend_api_url: default_resend_api_url(),
            from_address: default_from_address(),
            alert_from_address: default_alert_from_address(),
            admin_email: String::new(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl Default for EtransferConfig {
    fn default() -> Self {
        Self {
            recipient_email: default_etransfer_email(),
            recipient_name: default_etransfer_recipient(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_token: String::new(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/arena-campaign/campaign.db".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_baseline_offset() -> u64 {
    400
}

fn default_signature_goal() -> u64 {
    2_000
}

fn default_pledge_goal_dollars() -> u64 {
    150_000
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_seed_signatures() -> u64 {
    407
}

fn default_seed_pledge_dollars() -> u64 {
    34_750
}

fn default_seed_emails() -> u64 {
    203
}

fn default_email_goal() -> u64 {
    1_000
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_currency() -> String {
    "cad".to_string()
}

fn default_donation_description() -> String {
    "Donation to Salt Spring Island Arena Project".to_string()
}

fn default_project() -> String {
    "SSI Arena".to_string()
}

fn default_resend_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_from_address() -> String {
    "Salt Spring Island Arena Campaign <noreply@yourdomain.com>".to_string()
}

fn default_alert_from_address() -> String {
    "Petition Alerts <noreply@yourdomain.com>".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    2_000
}

fn default_etransfer_email() -> String {
    "healthylivingssi@gmail.com".to_string()
}

fn default_etransfer_recipient() -> String {
    "Healthy Living Salt Spring Island Society".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}
