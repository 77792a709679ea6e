#![forbid(unsafe_code)]

use a2s::{QueryResults, Scheduler};
use async_trait::async_trait;
use std::net::SocketAddrV4;
use tokio::net::UdpSocket;

#[async_trait]
pub trait PlayerQuery: Send + Sync {
    /// Ask every server for its player list.
    async fn query(&self, addrs: Vec<SocketAddrV4>) -> QueryResults;
}

/// Skips A2S entirely.
#[derive(Debug, Default)]
pub struct NoQuery;

#[async_trait]
impl PlayerQuery for NoQuery {
    async fn query(&self, _addrs: Vec<SocketAddrV4>) -> QueryResults {
        QueryResults::new()
    }
}

#[async_trait]
impl PlayerQuery for Scheduler<UdpSocket> {
    async fn query(&self, addrs: Vec<SocketAddrV4>) -> QueryResults {
        self.run(addrs).await
    }
}
