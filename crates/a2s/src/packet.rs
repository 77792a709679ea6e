//! A2S_PLAYER wire format.

use tracing::trace;

/// Every single-packet A2S message starts with this.
pub const PREFIX: [u8; 4] = [0xff; 4];
pub const A2S_PLAYER: u8 = 0x55;
pub const S2C_CHALLENGE: u8 = 0x41;
pub const S2A_PLAYER: u8 = 0x44;
/// Challenge value that asks the server for a real one.
pub const NO_CHALLENGE: i32 = -1;
pub const RECV_BUFFER_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Challenge,
    Players { challenge: i32 },
}

impl Request {
    pub fn encode(self) -> [u8; 9] {
        let challenge = match self {
            Self::Challenge => NO_CHALLENGE,
            Self::Players { challenge } => challenge,
        };
        let mut out = [0; 9];
        out[..4].copy_from_slice(&PREFIX);
        out[4] = A2S_PLAYER;
        out[5..].copy_from_slice(&challenge.to_le_bytes());
        out
    }
}

/// One entry of a player list.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub index: u8,
    pub name: String,
    pub score: i32,
    /// Seconds connected.
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Challenge(i32),
    Players(Vec<Player>),
    /// Anything else, including a truncated player list.
    Other,
}

pub fn parse_response(data: &[u8]) -> Response {
    match data.get(4) {
        Some(&S2C_CHALLENGE) if data.len() >= 9 => {
            Response::Challenge(i32::from_le_bytes([data[5], data[6], data[7], data[8]]))
        }
        Some(&S2A_PLAYER) if data.len() >= 6 => match parse_players(&data[5..]) {
            Some(players) => Response::Players(players),
            None => {
                trace!(len = data.len(), "truncated player list");
                Response::Other
            }
        },
        _ => Response::Other,
    }
}

fn parse_players(body: &[u8]) -> Option<Vec<Player>> {
    let mut reader = Reader { buf: body };
    let count = reader.u8()?;
    let mut players = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let index = reader.u8()?;
        let name = reader.cstr()?;
        let score = i32::from_le_bytes(reader.array()?);
        let duration = f32::from_le_bytes(reader.array()?);
        players.push(Player {
            index,
            name,
            score,
            duration,
        });
    }
    Some(players)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn u8(&mut self) -> Option<u8> {
        let (&first, rest) = self.buf.split_first()?;
        self.buf = rest;
        Some(first)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, rest) = self.buf.split_first_chunk::<N>()?;
        self.buf = rest;
        Some(*head)
    }

    fn cstr(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == 0)?;
        let name = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf = &self.buf[end + 1..];
        Some(name)
    }
}
