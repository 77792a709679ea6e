#![forbid(unsafe_code)]

mod error;
mod feed;
mod query;
mod rank;
mod tracker;
mod views;

pub use error::Error;
pub use feed::Feed;
pub use query::Query;
pub use rank::Rank;
pub use tracker::Tracker;
pub use views::Views;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub tracker: Tracker,
    pub rank: Rank,
    pub views: Views,
    pub query: Query,
    pub feed: Feed,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the config file at `path` on top of the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InvalidPath(path.to_owned()));
        }
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()?;
        config.validate()
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(doc: &str) -> Result<Self, Error> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(doc))
            .extract()?;
        config.validate()
    }

    /// Render the effective configuration.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml_edit::ser::to_string_pretty(self)?)
    }

    fn validate(mut self) -> Result<Self, Error> {
        let interval = self.rank.interval.as_secs();
        if interval == 0 {
            return Err(Error::InvalidValue {
                key: "rank.interval",
                reason: "must be at least one second".into(),
            });
        }
        if self.rank.window.as_secs() % interval != 0 {
            return Err(Error::InvalidValue {
                key: "rank.window",
                reason: format!("must be a multiple of rank.interval ({interval}s)"),
            });
        }
        let avg = self.views.avg_interval.as_secs();
        if avg == 0 || avg % interval != 0 {
            return Err(Error::InvalidValue {
                key: "views.avg_interval",
                reason: format!("must be a non-zero multiple of rank.interval ({interval}s)"),
            });
        }
        if self.tracker.poll_interval.is_zero() {
            return Err(Error::InvalidValue {
                key: "tracker.poll_interval",
                reason: "must be at least one second".into(),
            });
        }
        self.query = self.query.clamp();
        Ok(self)
    }
}
