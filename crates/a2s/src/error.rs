use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to bind query socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The server never completed the exchange.
    #[error("No answer from {addr} after {attempts} attempts")]
    NetworkTimeout { addr: SocketAddrV4, attempts: u32 },
}
