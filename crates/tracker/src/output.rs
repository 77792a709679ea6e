#![forbid(unsafe_code)]

//! Files published for the web front end.

use crate::domain::{ServerAddr, ServerState};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub last_update_time: u32,
    pub last_rank_time: u32,
    /// Seconds between rank updates.
    pub rank_freq: u64,
    pub unreachable_time: u64,
    pub rank_window: u64,
    pub rank_interval: u64,
    /// Keyed by `ip_port`.
    pub servers: BTreeMap<String, SnapshotServer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotServer {
    pub name: String,
    pub map: String,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub flags: u8,
    /// Last time the server was seen in the list.
    pub time: u32,
    /// Rank sum, larger is more popular.
    pub rank: u32,
    /// 1-based rank position, 0 when unranked.
    pub position: u16,
    pub unreachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_list: Option<Vec<SnapshotPlayer>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPlayer {
    pub name: String,
    pub score: i32,
    pub duration: f32,
}

impl From<&ServerState> for SnapshotServer {
    fn from(state: &ServerState) -> Self {
        let player_list = state.query_ok.then(|| {
            state
                .players_list
                .iter()
                .map(|player| SnapshotPlayer {
                    name: player.name.clone(),
                    score: player.score,
                    duration: player.duration,
                })
                .collect()
        });
        Self {
            name: state.name.clone(),
            map: state.map.clone(),
            players: state.players,
            max_players: state.max_players,
            bots: state.bots,
            flags: state.flags.bits(),
            time: state.last_response_time,
            rank: state.rank_sum,
            position: state.rank,
            unreachable: state.unreachable(),
            player_list,
        }
    }
}

/// Read a previously written snapshot. A missing file is `None`.
pub fn read_snapshot(path: &Path) -> Result<Option<Snapshot>, Error> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Io {
                path: path.to_owned(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| Error::Json {
            path: path.to_owned(),
            source,
        })
}

pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), Error> {
    let bytes = serde_json::to_vec(snapshot).map_err(|source| Error::Json {
        path: path.to_owned(),
        source,
    })?;
    history::write_atomic(path, &bytes)?;
    debug!(?path, servers = snapshot.servers.len(), "snapshot written");
    Ok(())
}

/// One line of the rank list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankLine<'a> {
    pub rank_sum: u32,
    pub addr: ServerAddr,
    pub name: &'a str,
}

/// Render the plain-text rank list, best server first.
pub fn render_rank_list<'a>(
    window: u32,
    interval: u32,
    lines: impl IntoIterator<Item = RankLine<'a>>,
) -> String {
    let mut out = format!("window={window}\ninterval={interval}\n");
    for line in lines {
        out.push_str(&format!("{}={}=", line.rank_sum, line.addr));
        // one server per line
        out.extend(
            line.name
                .chars()
                .map(|c| if c.is_control() { ' ' } else { c }),
        );
        out.push('\n');
    }
    out
}
