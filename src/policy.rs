//! Exclusion and recording thresholds.

use crate::config::ThresholdConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionPolicy {
    pub max_transactions: usize,
    pub record_threshold: u64,
}

impl ExclusionPolicy {
    pub fn new(max_transactions: usize, record_threshold: u64) -> Self {
        Self {
            max_transactions,
            record_threshold,
        }
    }

    /// Too many plain transfers: bar the address from future visits.
    pub fn should_exclude(&self, transfer_count: usize) -> bool {
        transfer_count > self.max_transactions
    }

    /// Enough historical activity to be written to the output.
    pub fn should_record(&self, historical_transfer_count: u64) -> bool {
        historical_transfer_count > self.record_threshold
    }
}

impl From<&ThresholdConfig> for ExclusionPolicy {
    fn from(config: &ThresholdConfig) -> Self {
        Self::new(config.max_transactions, config.record_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_boundary_is_exclusive() {
        let policy = ExclusionPolicy::new(100, 5);
        assert!(!policy.should_exclude(100));
        assert!(policy.should_exclude(101));
    }

    #[test]
    fn test_record_boundary_is_exclusive() {
        let policy = ExclusionPolicy::new(100, 5);
        assert!(!policy.should_record(5));
        assert!(policy.should_record(6));
        assert!(!policy.should_record(0));
    }

    #[test]
    fn test_from_config() {
        let policy = ExclusionPolicy::from(&ThresholdConfig::default());
        assert_eq!(policy, ExclusionPolicy::new(100, 5));
    }
}
