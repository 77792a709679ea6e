#![forbid(unsafe_code)]

use crate::domain::ServerFlags;
use crate::error::Error;
use async_trait::async_trait;

/// One server as reported by the upstream list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// `ip:port`
    pub addr: String,
    pub name: String,
    pub map: String,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub flags: ServerFlags,
}

#[async_trait]
pub trait ServerFeed: Send + Sync {
    /// Fetch the current list of servers.
    async fn fetch(&self) -> Result<Vec<FeedEntry>, Error>;
}

/// Feed that always returns the same entries.
#[derive(Debug, Default, Clone)]
pub struct StaticFeed {
    pub entries: Vec<FeedEntry>,
}

#[async_trait]
impl ServerFeed for StaticFeed {
    async fn fetch(&self) -> Result<Vec<FeedEntry>, Error> {
        Ok(self.entries.clone())
    }
}
