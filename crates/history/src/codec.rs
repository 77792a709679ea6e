//! Binary format of the history streams.
//!
//! A stream is an 8 byte [`Header`] followed by variable-length records. A
//! record is one control byte plus 1, 2 or 4 time bytes:
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! [T32 T16 |  player count (0-63) ]   reachable
//! [ 1   1  T32 T16 | 0   0   0   0 ]  unreachable
//! ```
//!
//! Without a time flag the record carries an 8-bit delta, `T16` a 16-bit
//! delta and `T32` an absolute epoch timestamp. Everything is little-endian.

use tracing::warn;

pub const FORMAT_VERSION: u32 = 1;
pub const HISTORY_MAGIC: [u8; 4] = *b"SVTK";
pub const RANK_MAGIC: [u8; 4] = *b"SVRK";
pub const HEADER_LEN: usize = 8;

pub const FL_TIME16: u8 = 0x40;
pub const FL_TIME32: u8 = 0x80;
pub const FL_MASK: u8 = FL_TIME16 | FL_TIME32;
/// Both time flags set: the server was unreachable.
pub const UNREACHABLE: u8 = FL_MASK;

pub const MAX_PLAYERS: u8 = 63;
/// Player count of a stream that has no record yet. Never equal to a decoded
/// count, so the first write always commits.
pub const SENTINEL_PLAYERS: u8 = 255;

/// Why a stream could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("header is {0} bytes, expected {HEADER_LEN}")]
    ShortHeader(usize),

    #[error("unsupported format version {0}")]
    BadVersion(u32),

    #[error("bad magic bytes {0:?}")]
    BadMagic([u8; 4]),

    #[error("record at offset {offset} is truncated")]
    Truncated { offset: usize },

    #[error("timestamp overflows at offset {offset}")]
    TimeOverflow { offset: usize },

    #[error("timestamp {found} at offset {offset} is before {previous}")]
    OutOfOrder {
        offset: usize,
        previous: u32,
        found: u32,
    },

    #[error("timestamp {found} is in the future (now {now})")]
    FutureTimestamp { found: u32, now: u32 },

    #[error("rank at offset {offset} is out of range")]
    RankOutOfRange { offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub magic: [u8; 4],
}

impl Header {
    pub fn new(magic: [u8; 4]) -> Self {
        Self {
            version: FORMAT_VERSION,
            magic,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0; HEADER_LEN];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..].copy_from_slice(&self.magic);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Corruption> {
        let Some(bytes) = bytes.get(..HEADER_LEN) else {
            return Err(Corruption::ShortHeader(bytes.len()));
        };
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let magic = [bytes[4], bytes[5], bytes[6], bytes[7]];
        Ok(Self { version, magic })
    }

    /// Decode the header at the start of `bytes` and check it belongs to the
    /// `magic` family.
    pub fn verify(bytes: &[u8], magic: [u8; 4]) -> Result<(), Corruption> {
        let header = Self::decode(bytes)?;
        if header.version != FORMAT_VERSION {
            return Err(Corruption::BadVersion(header.version));
        }
        if header.magic != magic {
            return Err(Corruption::BadMagic(header.magic));
        }
        Ok(())
    }
}

/// One observation: a player count or an unreachable mark at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerRecord {
    pub player_count: u8,
    pub unreachable: bool,
    pub timestamp: u32,
}

impl ServerRecord {
    /// Build a record, forcing the count to 0 when unreachable and clamping it
    /// to the 6 bits the format can hold.
    pub fn new(player_count: u8, unreachable: bool, timestamp: u32) -> Self {
        let player_count = if unreachable {
            0
        } else if player_count > MAX_PLAYERS {
            warn!(player_count, "player count does not fit the format, clamped");
            MAX_PLAYERS
        } else {
            player_count
        };
        Self {
            player_count,
            unreachable,
            timestamp,
        }
    }
}

/// Running state of a stream: what the last record said and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail {
    pub player_count: u8,
    pub unreachable: bool,
    pub last_write_time: u32,
}

impl Default for Tail {
    fn default() -> Self {
        Self::fresh()
    }
}

impl Tail {
    /// Tail of a stream with no record.
    pub fn fresh() -> Self {
        Self {
            player_count: SENTINEL_PLAYERS,
            unreachable: false,
            last_write_time: 0,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.player_count == SENTINEL_PLAYERS
    }

    /// `true` when `record` would not change the stream.
    pub fn holds(&self, record: &ServerRecord) -> bool {
        self.player_count == record.player_count && self.unreachable == record.unreachable
    }

    pub fn apply(&mut self, record: &ServerRecord) {
        self.player_count = record.player_count;
        self.unreachable = record.unreachable;
        self.last_write_time = record.timestamp;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeWidth {
    Delta8,
    Delta16,
    Absolute32,
}

impl TimeWidth {
    fn select(tail: &Tail, timestamp: u32, force_absolute: bool) -> Self {
        if force_absolute || tail.is_fresh() {
            return Self::Absolute32;
        }
        match timestamp.saturating_sub(tail.last_write_time) {
            0..=0xff => Self::Delta8,
            0x100..=0xffff => Self::Delta16,
            _ => Self::Absolute32,
        }
    }

    fn from_flags(flags: u8) -> Self {
        if flags & FL_TIME32 != 0 {
            Self::Absolute32
        } else if flags & FL_TIME16 != 0 {
            Self::Delta16
        } else {
            Self::Delta8
        }
    }

    fn flags(self) -> u8 {
        match self {
            Self::Delta8 => 0,
            Self::Delta16 => FL_TIME16,
            Self::Absolute32 => FL_TIME32,
        }
    }

    fn len(self) -> usize {
        match self {
            Self::Delta8 => 1,
            Self::Delta16 => 2,
            Self::Absolute32 => 4,
        }
    }
}

/// Bytes of one encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedRecord {
    buf: [u8; 5],
    len: usize,
}

impl EncodedRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Encode `record` against `tail`. Returns `None` when the record would not
/// change the stream. The tail is left untouched, the caller applies it once
/// the bytes are stored.
pub fn encode_record(
    tail: &Tail,
    record: &ServerRecord,
    force_absolute: bool,
) -> Option<EncodedRecord> {
    if tail.holds(record) {
        return None;
    }

    let timestamp = record.timestamp.max(tail.last_write_time);
    let width = TimeWidth::select(tail, timestamp, force_absolute);
    let control = if record.unreachable {
        UNREACHABLE | (width.flags() >> 2)
    } else {
        width.flags() | (record.player_count & !FL_MASK)
    };

    let mut buf = [0; 5];
    buf[0] = control;
    let delta = timestamp - tail.last_write_time;
    match width {
        TimeWidth::Delta8 => buf[1] = delta as u8,
        TimeWidth::Delta16 => buf[1..3].copy_from_slice(&(delta as u16).to_le_bytes()),
        TimeWidth::Absolute32 => buf[1..5].copy_from_slice(&timestamp.to_le_bytes()),
    }

    Some(EncodedRecord {
        buf,
        len: 1 + width.len(),
    })
}

/// Streaming decoder over the records that follow a header.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    bytes: &'a [u8],
    offset: usize,
    tail: Tail,
    failed: bool,
}

impl<'a> Records<'a> {
    /// `bytes` must start right after the header.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            tail: Tail::fresh(),
            failed: false,
        }
    }

    /// Decode a whole stream, header included.
    pub fn from_stream(bytes: &'a [u8], magic: [u8; 4]) -> Result<Self, Corruption> {
        Header::verify(bytes, magic)?;
        Ok(Self::new(&bytes[HEADER_LEN..]))
    }

    /// State after the records decoded so far.
    pub fn tail(&self) -> Tail {
        self.tail
    }

    fn decode_next(&mut self) -> Result<ServerRecord, Corruption> {
        // offsets in errors are relative to the start of the stream
        let offset = self.offset + HEADER_LEN;
        let control = self.bytes[self.offset];

        let (player_count, unreachable, width) = if control & FL_MASK == UNREACHABLE {
            if control & 0x0f != 0 {
                warn!(offset, control, "unreachable record has stray low bits");
            }
            (0, true, TimeWidth::from_flags((control << 2) & FL_MASK))
        } else {
            (
                control & !FL_MASK,
                false,
                TimeWidth::from_flags(control & FL_MASK),
            )
        };

        let start = self.offset + 1;
        let Some(time) = self.bytes.get(start..start + width.len()) else {
            return Err(Corruption::Truncated { offset });
        };
        let previous = self.tail.last_write_time;
        let timestamp = match width {
            TimeWidth::Delta8 => previous.checked_add(u32::from(time[0])),
            TimeWidth::Delta16 => {
                previous.checked_add(u32::from(u16::from_le_bytes([time[0], time[1]])))
            }
            TimeWidth::Absolute32 => {
                let found = u32::from_le_bytes([time[0], time[1], time[2], time[3]]);
                if found < previous {
                    return Err(Corruption::OutOfOrder {
                        offset,
                        previous,
                        found,
                    });
                }
                Some(found)
            }
        }
        .ok_or(Corruption::TimeOverflow { offset })?;

        self.offset = start + width.len();
        let record = ServerRecord {
            player_count,
            unreachable,
            timestamp,
        };
        self.tail.apply(&record);
        Ok(record)
    }
}

impl Iterator for Records<'_> {
    type Item = Result<ServerRecord, Corruption>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        let result = self.decode_next();
        self.failed = result.is_err();
        Some(result)
    }
}

/// In-memory stream writer, used to build derived views.
#[derive(Debug, Clone)]
pub struct StreamBuilder {
    bytes: Vec<u8>,
    tail: Tail,
}

impl StreamBuilder {
    pub fn new(magic: [u8; 4]) -> Self {
        Self {
            bytes: Header::new(magic).encode().to_vec(),
            tail: Tail::fresh(),
        }
    }

    /// Append `record`; `false` when it did not change the stream.
    pub fn push(&mut self, record: &ServerRecord, force_absolute: bool) -> bool {
        match encode_record(&self.tail, record, force_absolute) {
            Some(encoded) => {
                self.bytes.extend_from_slice(encoded.as_bytes());
                self.tail.apply(record);
                true
            }
            None => false,
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
