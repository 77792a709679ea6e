#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{net::SocketAddr, time::Duration};

#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Query {
    /// Run an A2S player query pass after every poll.
    pub enabled: bool,

    /// Local address of the query socket.
    pub bind: SocketAddr,

    /// Attempts per phase before a job gives up (clamped to 1..=10).
    pub max_attempts: u32,

    /// Time to wait for a reply before retrying.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub timeout: Duration,

    /// Cap on outgoing packets per scheduler tick (clamped to 1..=10000).
    pub max_sends_per_tick: u32,

    /// Pause between two scheduler ticks.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub tick_yield: Duration,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            max_attempts: 3,
            timeout: Duration::from_millis(1000),
            max_sends_per_tick: 100,
            tick_yield: Duration::from_millis(1),
        }
    }
}

impl Query {
    pub fn clamp(self) -> Self {
        Self {
            max_attempts: self.max_attempts.clamp(1, 10),
            max_sends_per_tick: self.max_sends_per_tick.clamp(1, 10_000),
            ..self
        }
    }
}
