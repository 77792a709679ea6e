#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Rank {
    /// Trailing span summed into a rank.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub window: Duration,

    /// Resolution of the backfilled samples.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub interval: Duration,

    /// Time between two rank recomputations.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub update_interval: Duration,
}

impl Default for Rank {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(14 * 24 * 60 * 60),
            interval: Duration::from_secs(60),
            update_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl Rank {
    /// Number of samples a valid rank sum is made of.
    pub fn expected_samples(&self) -> u64 {
        self.window.as_secs() / self.interval.as_secs().max(1)
    }
}
