#![forbid(unsafe_code)]

use crate::error::Error;
use bitflags::bitflags;
use history::{RankMark, Tail};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

/// IPv4 endpoint of a game server.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddr(SocketAddrV4);

impl ServerAddr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    pub fn socket(&self) -> SocketAddrV4 {
        self.0
    }

    /// File name stem of the server's streams, `ip_port`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.0.ip(), self.0.port())
    }

    pub fn from_id(id: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidAddress(id.to_owned());
        let (ip, port) = id.rsplit_once('_').ok_or_else(invalid)?;
        let ip = ip.parse().map_err(|_| invalid())?;
        let port = port.parse().map_err(|_| invalid())?;
        Self::checked(SocketAddrV4::new(ip, port)).ok_or_else(invalid)
    }

    fn checked(addr: SocketAddrV4) -> Option<Self> {
        (addr.port() != 0).then_some(Self(addr))
    }
}

impl From<SocketAddrV4> for ServerAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self(addr)
    }
}

impl FromStr for ServerAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddrV4>()
            .ok()
            .and_then(Self::checked)
            .ok_or_else(|| Error::InvalidAddress(s.to_owned()))
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServerAddr").field(&self.0).finish()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ServerFlags: u8 {
        const DEDICATED = 1;
        const SECURE = 2;
        const LINUX = 4;
    }
}

/// Everything known about one tracked server.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub addr: ServerAddr,
    pub name: String,
    pub map: String,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub flags: ServerFlags,
    /// Last state written to the history stream.
    pub tail: Tail,
    pub last_response_time: u32,
    pub rank_sum: u32,
    /// Position in the last ranking, 0 when unranked.
    pub rank: u16,
    /// Last mark written to the rank history.
    pub last_rank: Option<RankMark>,
    pub players_list: Vec<a2s::Player>,
    /// The last A2S query succeeded.
    pub query_ok: bool,
}

impl ServerState {
    pub fn new(addr: ServerAddr) -> Self {
        Self {
            addr,
            name: String::new(),
            map: String::new(),
            players: 0,
            max_players: 0,
            bots: 0,
            flags: ServerFlags::empty(),
            tail: Tail::fresh(),
            last_response_time: 0,
            rank_sum: 0,
            rank: 0,
            last_rank: None,
            players_list: Vec::new(),
            query_ok: false,
        }
    }

    pub fn unreachable(&self) -> bool {
        self.tail.unreachable
    }

    /// Name for log lines.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "<unnamed>"
        } else {
            &self.name
        }
    }

    pub(crate) fn forget_players(&mut self) {
        self.players = 0;
        self.players_list.clear();
        self.query_ok = false;
    }
}
