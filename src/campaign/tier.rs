use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PledgeTier {
    pub min_dollars: u64,
    pub label: &'static str,
    pub description: &'static str,
    /// Position in the ladder; higher ranks need larger pledges.
    pub rank: u8,
}

/// Ordered from the largest threshold down.
pub const PLEDGE_TIERS: [PledgeTier; 10] = [
    tier(25_000, "Visionary", "Major", 10),
    tier(10_000, "Legacy", "$10,000", 9),
    tier(5_000, "Foundation", "$5,000", 8),
    tier(2_500, "Pillar", "$2,500", 7),
    tier(1_000, "Cornerstone", "$1,000", 6),
    tier(500, "Builder", "$500", 5),
    tier(250, "Champion", "$250", 4),
    tier(100, "Advocate", "$100", 3),
    tier(50, "Friend", "$50", 2),
    tier(25, "Supporter", "$25", 1),
];

pub const DEFAULT_TIER: PledgeTier = tier(0, "Supporter", "Custom", 0);

const fn tier(min_dollars: u64, label: &'static str, description: &'static str, rank: u8) -> PledgeTier {
    PledgeTier {
        min_dollars,
        label,
        description,
        rank,
    }
}

/// Highest tier whose threshold `amount_dollars` meets. Total over all
/// inputs: zero, negative and NaN amounts get the default tier.
pub fn pledge_tier(amount_dollars: f64) -> PledgeTier {
    if !(amount_dollars >= 0.0) {
        return DEFAULT_TIER;
    }
    PLEDGE_TIERS
        .iter()
        .find(|tier| amount_dollars >= tier.min_dollars as f64)
        .copied()
        .unwrap_or(DEFAULT_TIER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_inclusive() {
        assert_eq!(pledge_tier(25.0).label, "Supporter");
        assert_eq!(pledge_tier(25.0).description, "$25");
        assert_eq!(pledge_tier(99.99).label, "Friend");
        assert_eq!(pledge_tier(100.0).label, "Advocate");
        assert_eq!(pledge_tier(1_000.0).label, "Cornerstone");
        assert_eq!(pledge_tier(250_000.0).label, "Visionary");
    }

    #[test]
    fn small_and_invalid_amounts_get_the_default() {
        for amount in [0.0, 10.0, 24.99, -5.0, f64::NAN] {
            assert_eq!(pledge_tier(amount), DEFAULT_TIER, "amount {amount}");
        }
        assert_eq!(DEFAULT_TIER.description, "Custom");
    }

    #[test]
    fn rank_never_decreases_with_amount() {
        let mut previous = pledge_tier(0.0).rank;
        for cents in (0..3_000_000u64).step_by(137) {
            let rank = pledge_tier(cents as f64 / 100.0).rank;
            assert!(rank >= previous, "rank dropped at {cents} cents");
            previous = rank;
        }
    }

    #[test]
    fn ladder_is_strictly_descending() {
        for pair in PLEDGE_TIERS.windows(2) {
            assert!(pair[0].min_dollars > pair[1].min_dollars);
            assert!(pair[0].rank > pair[1].rank);
        }
    }
}
