use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SignatureId = i64;
pub type PledgeId = i64;

pub const CENTS_PER_DOLLAR: i64 = 100;
pub const DEFAULT_SIGNATURE_GOAL: u64 = 2_000;
pub const DEFAULT_PLEDGE_GOAL_CENTS: i64 = 150_000 * CENTS_PER_DOLLAR;
/// Pledges at or above this amount put a supporter in the major-pledger audience.
pub const MAJOR_PLEDGE_CENTS: i64 = 1_000 * CENTS_PER_DOLLAR;
/// Largest single pledge accepted online.
pub const MAX_PLEDGE_DOLLARS: f64 = 10_000_000.0;

pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * CENTS_PER_DOLLAR as f64).round() as i64
}

pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / CENTS_PER_DOLLAR as f64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSignature {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub postal_code: String,
    pub consent_petition: bool,
    pub consent_updates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    pub id: SignatureId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub postal_code: String,
    pub consent_petition: bool,
    pub consent_updates: bool,
    pub created_at: DateTime<Utc>,
}

impl Signature {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPledge {
    pub signature_id: SignatureId,
    pub amount_cents: i64,
    pub pledge_tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pledge {
    pub id: PledgeId,
    pub signature_id: SignatureId,
    pub amount_cents: i64,
    pub pledge_tier: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Goal values held in the single statistics-configuration row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsConfig {
    pub signature_goal: u64,
    pub pledge_goal_cents: i64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            signature_goal: DEFAULT_SIGNATURE_GOAL,
            pledge_goal_cents: DEFAULT_PLEDGE_GOAL_CENTS,
        }
    }
}

/// Point-in-time aggregate over signatures and pledges.
///
/// Derived, never authoritative: two reads with no intervening writes are
/// equal, and `last_updated` is the newest persisted row rather than the
/// time of the read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignStats {
    pub signatures: u64,
    pub pledges: u64,
    pub pledge_amount_cents: i64,
    pub signature_goal: u64,
    pub pledge_goal_cents: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CampaignStats {
    pub fn pledge_amount_dollars(&self) -> f64 {
        cents_to_dollars(self.pledge_amount_cents)
    }

    pub fn pledge_goal_dollars(&self) -> f64 {
        cents_to_dollars(self.pledge_goal_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[default]
    All,
    Pledgers,
    MajorPledgers,
}

impl Audience {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Pledgers => "pledgers",
            Self::MajorPledgers => "major_pledgers",
        }
    }
}

impl Display for Audience {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Error)]
#[error("unknown audience: {0}")]
pub struct AudienceParseError(pub String);

impl FromStr for Audience {
    type Err = AudienceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "all" | "" => Ok(Self::All),
            "pledgers" => Ok(Self::Pledgers),
            "major_pledgers" | "major" => Ok(Self::MajorPledgers),
            _ => Err(AudienceParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailCampaignLog {
    pub subject: String,
    pub audience: Audience,
    pub recipients_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_dollar_amounts_survive_the_cents_round_trip() {
        for dollars in [1u64, 25, 100, 2_500, 25_000, 150_000] {
            let cents = dollars_to_cents(dollars as f64);
            assert_eq!(cents, dollars as i64 * 100);
            assert_eq!(cents_to_dollars(cents), dollars as f64);
        }
    }

    #[test]
    fn fractional_dollars_round_to_nearest_cent() {
        assert_eq!(dollars_to_cents(19.99), 1999);
        assert_eq!(dollars_to_cents(0.5), 50);
    }

    #[test]
    fn parses_audience_aliases() {
        assert_eq!("major".parse::<Audience>().unwrap(), Audience::MajorPledgers);
        assert_eq!(
            "Major-Pledgers".parse::<Audience>().unwrap(),
            Audience::MajorPledgers
        );
        assert_eq!("pledgers".parse::<Audience>().unwrap(), Audience::Pledgers);
        assert!("donors".parse::<Audience>().is_err());
    }
}
