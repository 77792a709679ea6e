#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Views {
    /// Rebuild the live and avg files after every committed write.
    pub enabled: bool,

    #[serde_as(as = "serde_with::DurationSeconds")]
    pub live_window: Duration,

    /// Bucket length of the averaged view.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub avg_interval: Duration,
}

impl Default for Views {
    fn default() -> Self {
        Self {
            enabled: true,
            live_window: Duration::from_secs(30 * 24 * 60 * 60),
            avg_interval: Duration::from_secs(60 * 60),
        }
    }
}
