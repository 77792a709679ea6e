//! Server list from the Steam Web API.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use tracker::{Error, FeedEntry, ServerFeed, ServerFlags};

pub struct SteamFeed {
    client: reqwest::Client,
    config: config::Feed,
}

impl SteamFeed {
    pub fn new(config: config::Feed) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ServerFeed for SteamFeed {
    async fn fetch(&self) -> Result<Vec<FeedEntry>, Error> {
        let limit = self.config.limit.to_string();
        let filter = self.config.filter();
        let list: Envelope = self
            .client
            .get(&self.config.url)
            .query(&[
                ("key", self.config.key.as_str()),
                ("filter", filter.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| Error::Feed(Box::new(err)))?
            .json()
            .await
            .map_err(|err| Error::Feed(Box::new(err)))?;

        debug!(servers = list.response.servers.len(), "server list fetched");
        Ok(list.response.into_entries())
    }
}

/// A reply without `response.servers` is a failed fetch, not an empty list.
#[derive(Debug, Deserialize)]
struct Envelope {
    response: ServerList,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<SteamServer>,
}

impl ServerList {
    fn into_entries(self) -> Vec<FeedEntry> {
        self.servers.into_iter().map(FeedEntry::from).collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SteamServer {
    addr: String,
    name: String,
    map: String,
    players: u32,
    max_players: u32,
    bots: u32,
    dedicated: bool,
    secure: bool,
    /// `l`, `w` or `m`
    os: String,
}

impl From<SteamServer> for FeedEntry {
    fn from(server: SteamServer) -> Self {
        let mut flags = ServerFlags::empty();
        flags.set(ServerFlags::DEDICATED, server.dedicated);
        flags.set(ServerFlags::SECURE, server.secure);
        flags.set(ServerFlags::LINUX, server.os == "l");
        Self {
            addr: server.addr,
            name: server.name,
            map: server.map,
            players: server.players,
            max_players: server.max_players,
            bots: server.bots,
            flags,
        }
    }
}
