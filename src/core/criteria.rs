use serde::{Deserialize, Serialize};

/// Bitmask of independent match criteria. Active criteria are evaluated
/// as an AND-chain; see [`crate::core::predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchCriteria(u16);

impl MatchCriteria {
    pub const NONE: Self = Self(0);
    pub const NAME: Self = Self(1 << 0);
    pub const SIZE: Self = Self(1 << 1);
    pub const DATE: Self = Self(1 << 2);
    /// Image dimensions.
    pub const DIM: Self = Self(1 << 3);
    pub const CHECKSUM: Self = Self(1 << 4);
    pub const PATH: Self = Self(1 << 5);
    pub const SIM_HIGH: Self = Self(1 << 6);
    pub const SIM_MED: Self = Self(1 << 7);
    pub const SIM_LOW: Self = Self(1 << 8);
    pub const SIM_CUSTOM: Self = Self(1 << 9);
    /// Same as name, but case insensitive.
    pub const NAME_CI: Self = Self(1 << 10);
    /// Same name, but different content.
    pub const NAME_CONTENT: Self = Self(1 << 11);
    /// Same name case-insensitive, but different content.
    pub const NAME_CI_CONTENT: Self = Self(1 << 12);
    /// Everything matches everything.
    pub const ALL: Self = Self(1 << 13);

    pub const SIM_ANY: Self = Self(
        Self::SIM_HIGH.0 | Self::SIM_MED.0 | Self::SIM_LOW.0 | Self::SIM_CUSTOM.0,
    );

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when the mask is exactly one similarity tier. Only then does
    /// the matching pass run on the worker pool; mixed masks go through
    /// the sequential array scan.
    pub fn is_similarity_only(self) -> bool {
        matches!(
            self,
            Self::SIM_HIGH | Self::SIM_MED | Self::SIM_LOW | Self::SIM_CUSTOM
        )
    }

    /// Whether the pass needs checksums computed up front.
    pub fn needs_checksum(self) -> bool {
        self.intersects(Self(
            Self::CHECKSUM.0 | Self::NAME_CONTENT.0 | Self::NAME_CI_CONTENT.0,
        ))
    }

    pub fn needs_dimensions(self) -> bool {
        self.intersects(Self::DIM)
    }

    pub fn needs_similarity(self) -> bool {
        self.intersects(Self::SIM_ANY)
    }
}

impl std::ops::BitOr for MatchCriteria {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MatchCriteria {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Configuration of one matching pass. All knobs are external inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    pub criteria: MatchCriteria,
    /// Threshold percentage for the SIM_CUSTOM tier, 0..=100.
    pub custom_threshold: u8,
    /// Worker-pool size; defaults to the available parallelism.
    pub pool_threads: Option<usize>,
    /// Sort the final group list by totals instead of rank.
    pub sort_totals: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            criteria: MatchCriteria::CHECKSUM,
            custom_threshold: 99,
            pool_threads: None,
            sort_totals: false,
        }
    }
}

impl MatchConfig {
    pub fn new(criteria: MatchCriteria) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    /// Minimum similarity fraction for the active tier.
    pub fn similarity_threshold(&self) -> f64 {
        let c = self.criteria;
        if c.intersects(MatchCriteria::SIM_HIGH) {
            0.95
        } else if c.intersects(MatchCriteria::SIM_MED) {
            0.90
        } else if c.intersects(MatchCriteria::SIM_CUSTOM) {
            f64::from(self.custom_threshold) / 100.0
        } else {
            0.85
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_operations() {
        let mask = MatchCriteria::NAME | MatchCriteria::SIZE;
        assert!(mask.contains(MatchCriteria::NAME));
        assert!(mask.contains(MatchCriteria::SIZE));
        assert!(!mask.contains(MatchCriteria::DATE));
        assert!(mask.intersects(MatchCriteria::SIZE | MatchCriteria::DATE));
        assert!(!mask.intersects(MatchCriteria::CHECKSUM));
        assert!(MatchCriteria::NONE.is_empty());
    }

    #[test]
    fn test_similarity_only() {
        assert!(MatchCriteria::SIM_MED.is_similarity_only());
        assert!(MatchCriteria::SIM_CUSTOM.is_similarity_only());
        assert!(!(MatchCriteria::SIM_MED | MatchCriteria::SIZE).is_similarity_only());
        assert!(!MatchCriteria::CHECKSUM.is_similarity_only());
    }

    #[test]
    fn test_setup_requirements() {
        assert!(MatchCriteria::CHECKSUM.needs_checksum());
        assert!(MatchCriteria::NAME_CONTENT.needs_checksum());
        assert!(MatchCriteria::NAME_CI_CONTENT.needs_checksum());
        assert!(!MatchCriteria::NAME.needs_checksum());
        assert!(MatchCriteria::DIM.needs_dimensions());
        assert!(MatchCriteria::SIM_LOW.needs_similarity());
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(
            MatchConfig::new(MatchCriteria::SIM_HIGH).similarity_threshold(),
            0.95
        );
        assert_eq!(
            MatchConfig::new(MatchCriteria::SIM_MED).similarity_threshold(),
            0.90
        );
        assert_eq!(
            MatchConfig::new(MatchCriteria::SIM_LOW).similarity_threshold(),
            0.85
        );
        let mut config = MatchConfig::new(MatchCriteria::SIM_CUSTOM);
        config.custom_threshold = 70;
        assert_eq!(config.similarity_threshold(), 0.70);
    }
}
