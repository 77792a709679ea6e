#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Feed {
    pub url: String,

    /// Steam Web API key.
    pub key: String,

    /// Steam application id of the tracked game.
    pub appid: u32,

    pub limit: u32,

    #[serde_as(as = "serde_with::DurationSeconds")]
    pub timeout: Duration,
}

impl Default for Feed {
    fn default() -> Self {
        Self {
            url: "https://api.steampowered.com/IGameServersService/GetServerList/v1".into(),
            key: String::new(),
            // Sven Co-op
            appid: 225840,
            limit: 20000,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Feed {
    /// Steam master server filter for dedicated servers of `appid`.
    pub fn filter(&self) -> String {
        format!("\\appid\\{}\\dedicated\\1", self.appid)
    }
}
