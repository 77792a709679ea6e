#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{path::PathBuf, time::Duration};

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Tracker {
    /// Root of the `stats/` and `rank/` folders.
    pub data_dir: PathBuf,

    /// Snapshot of every tracked server, relative to `data_dir`.
    pub snapshot_file: PathBuf,

    /// Plain-text ranked list, relative to `data_dir`.
    pub rank_list_file: PathBuf,

    /// Time between two polls of the upstream server list.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub poll_interval: Duration,

    /// A server missing from the list for this long is written as unreachable.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub unreachable_time: Duration,

    /// A server missing from the list for this long is archived.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub dead_time: Duration,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            snapshot_file: PathBuf::from("tracker.json"),
            rank_list_file: PathBuf::from("ranks.txt"),
            poll_interval: Duration::from_secs(60),
            unreachable_time: Duration::from_secs(5 * 60),
            dead_time: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

impl Tracker {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn rank_list_path(&self) -> PathBuf {
        self.data_dir.join(&self.rank_list_file)
    }
}
