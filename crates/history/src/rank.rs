//! Sliding-window rank sums and the per-server rank history.

use crate::Error;
use crate::codec::{Corruption, HEADER_LEN, HISTORY_MAGIC, Header, RANK_MAGIC, Records, Tail};
use crate::layout::Layout;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Span and resolution of the rank aggregation, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankWindow {
    pub window: u32,
    pub interval: u32,
}

impl RankWindow {
    pub fn new(window: u32, interval: u32) -> Self {
        Self {
            window,
            interval: interval.max(1),
        }
    }

    pub fn expected_samples(&self) -> u64 {
        u64::from(self.window / self.interval)
    }
}

impl From<&config::Rank> for RankWindow {
    fn from(rank: &config::Rank) -> Self {
        Self::new(
            u32::try_from(rank.window.as_secs()).unwrap_or(u32::MAX),
            u32::try_from(rank.interval.as_secs()).unwrap_or(u32::MAX),
        )
    }
}

/// Player count a server held over some span of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Level {
    pub(crate) count: u8,
    pub(crate) unreachable: bool,
}

impl Level {
    pub(crate) fn value(self) -> u64 {
        if self.unreachable {
            0
        } else {
            u64::from(self.count)
        }
    }
}

/// Fixed-resolution sampler over a sparse change-log. Gaps are filled with
/// the last known level.
#[derive(Debug, Clone)]
pub(crate) struct Resampler {
    next: i64,
    interval: i64,
    level: Level,
}

impl Resampler {
    pub(crate) fn new(start: i64, interval: u32) -> Self {
        Self {
            next: start,
            interval: i64::from(interval.max(1)),
            level: Level::default(),
        }
    }

    /// Take one sample for every grid point at or before `until`, each holding
    /// the level in effect before `until`.
    pub(crate) fn advance(&mut self, until: i64, mut sample: impl FnMut(i64, Level)) {
        while self.next <= until {
            sample(self.next, self.level);
            self.next += self.interval;
        }
    }

    pub(crate) fn set(&mut self, level: Level) {
        self.level = level;
    }
}

/// Rectangle-rule integration of the player count over the rank window.
#[derive(Debug, Clone)]
pub struct RankAccumulator {
    resampler: Resampler,
    sum: u64,
    samples: u64,
    expected: u64,
}

impl RankAccumulator {
    pub fn new(window: RankWindow, now: u32) -> Self {
        Self {
            resampler: Resampler::new(
                i64::from(now) - i64::from(window.window),
                window.interval,
            ),
            sum: 0,
            samples: 0,
            expected: window.expected_samples(),
        }
    }

    pub fn observe(&mut self, player_count: u8, unreachable: bool, timestamp: u32) {
        let Self {
            resampler,
            sum,
            samples,
            ..
        } = self;
        resampler.advance(i64::from(timestamp), |_, level| {
            *sum += level.value();
            *samples += 1;
        });
        resampler.set(Level {
            count: player_count,
            unreachable,
        });
    }

    /// Backfill up to `now` and return the sum, or 0 when the sample count
    /// does not cover exactly the window.
    pub fn finish(mut self, now: u32) -> u32 {
        self.observe_until(now);
        let taken = self.samples.saturating_sub(1);
        if taken != self.expected {
            warn!(
                samples = taken,
                expected = self.expected,
                "unexpected rank sample count, rank sum discarded"
            );
            return 0;
        }
        u32::try_from(self.sum).unwrap_or(u32::MAX)
    }

    fn observe_until(&mut self, now: u32) {
        let Self {
            resampler,
            sum,
            samples,
            ..
        } = self;
        resampler.advance(i64::from(now), |_, level| {
            *sum += level.value();
            *samples += 1;
        });
    }
}

/// Result of replaying a whole history stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replay {
    pub tail: Tail,
    pub rank_sum: u32,
    pub records: usize,
}

/// Decode a history stream and compute its rank sum in the same pass.
pub fn replay(bytes: &[u8], window: RankWindow, now: u32) -> Result<Replay, Corruption> {
    let mut records = Records::from_stream(bytes, HISTORY_MAGIC)?;
    let mut rank = RankAccumulator::new(window, now);
    let mut count = 0;

    for record in records.by_ref() {
        let record = record?;
        if record.timestamp > now {
            return Err(Corruption::FutureTimestamp {
                found: record.timestamp,
                now,
            });
        }
        rank.observe(record.player_count, record.unreachable, record.timestamp);
        count += 1;
    }

    Ok(Replay {
        tail: records.tail(),
        rank_sum: rank.finish(now),
        records: count,
    })
}

/// A server's rank at some point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankMark {
    pub rank: u16,
    pub time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked<K> {
    pub key: K,
    pub rank_sum: u32,
    /// 1 for the most popular server, 0 when unranked.
    pub rank: u16,
}

/// Order servers by rank sum, best first. Servers without players in the
/// window get rank 0.
pub fn assign_ranks<K: Ord>(sums: impl IntoIterator<Item = (K, u32)>) -> Vec<Ranked<K>> {
    let mut items: Vec<(K, u32)> = sums.into_iter().collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut position: u16 = 0;
    items
        .into_iter()
        .map(|(key, rank_sum)| {
            let rank = if rank_sum == 0 {
                0
            } else {
                position = position.saturating_add(1);
                position
            };
            Ranked {
                key,
                rank_sum,
                rank,
            }
        })
        .collect()
}

pub const RANK_LITERAL: u8 = 0x80;
pub const RANK_TIME32: u8 = 0x40;
const RANK_DELTA_MASK: u8 = 0x3f;

/// Encode `mark` as a delta against `last`, or as a baseline when `last` is
/// `None`.
pub fn encode_rank(last: Option<RankMark>, mark: RankMark) -> Vec<u8> {
    let delta = last
        .map(|last| i32::from(mark.rank) - i32::from(last.rank))
        .filter(|delta| (-32..=31).contains(delta));
    let elapsed = last.map(|last| mark.time.saturating_sub(last.time));
    let absolute = elapsed.is_none_or(|elapsed| elapsed > 0xffff);

    let mut control = if absolute { RANK_TIME32 } else { 0 };
    match delta {
        Some(delta) => control |= (delta as i8 as u8) & RANK_DELTA_MASK,
        None => control |= RANK_LITERAL,
    }

    let mut out = vec![control];
    match elapsed {
        Some(elapsed) if !absolute => out.extend_from_slice(&(elapsed as u16).to_le_bytes()),
        _ => out.extend_from_slice(&mark.time.to_le_bytes()),
    }
    if delta.is_none() {
        out.extend_from_slice(&mark.rank.to_le_bytes());
    }
    out
}

/// Decode every mark of a rank history.
pub fn decode_ranks(bytes: &[u8]) -> Result<Vec<RankMark>, Corruption> {
    Header::verify(bytes, RANK_MAGIC)?;
    let mut marks = Vec::new();
    let mut last = RankMark { rank: 0, time: 0 };
    let mut pos = HEADER_LEN;

    while pos < bytes.len() {
        let offset = pos;
        let control = bytes[pos];
        pos += 1;

        let time_len = if control & RANK_TIME32 != 0 { 4 } else { 2 };
        let time = bytes
            .get(pos..pos + time_len)
            .ok_or(Corruption::Truncated { offset })?;
        pos += time_len;
        let time = if time_len == 4 {
            u32::from_le_bytes([time[0], time[1], time[2], time[3]])
        } else {
            last.time
                .checked_add(u32::from(u16::from_le_bytes([time[0], time[1]])))
                .ok_or(Corruption::TimeOverflow { offset })?
        };

        let rank = if control & RANK_LITERAL != 0 {
            let raw = bytes
                .get(pos..pos + 2)
                .ok_or(Corruption::Truncated { offset })?;
            pos += 2;
            u16::from_le_bytes([raw[0], raw[1]])
        } else {
            // sign-extend the 6-bit delta
            let delta = (((control & RANK_DELTA_MASK) << 2) as i8) >> 2;
            u16::try_from(i32::from(last.rank) + i32::from(delta))
                .map_err(|_| Corruption::RankOutOfRange { offset })?
        };

        last = RankMark { rank, time };
        marks.push(last);
    }

    Ok(marks)
}

/// Read the rank history at `path`.
pub fn read_rank_history(path: &Path) -> Result<Vec<RankMark>, Error> {
    let bytes = fs::read(path).map_err(Error::io(path))?;
    decode_ranks(&bytes).map_err(Error::corrupt(path))
}

/// Append `rank` to the rank history of `id` unless it is unchanged.
///
/// `last` is the last mark known to the caller; when `None` and the stream
/// exists it is read back from disk. A new stream always gets a baseline
/// record.
pub fn record_rank(
    layout: &Layout,
    id: &str,
    last: Option<RankMark>,
    rank: u16,
    now: u32,
) -> Result<RankMark, Error> {
    let path = layout.rank(id);
    let mark = RankMark { rank, time: now };

    if !path.exists() {
        let dir = layout.rank_dir();
        fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
        let mut bytes = Header::new(RANK_MAGIC).encode().to_vec();
        bytes.extend(encode_rank(None, mark));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(Error::io(&path))?;
        file.write_all(&bytes).map_err(Error::io(&path))?;
        debug!(id, rank, "rank history created");
        return Ok(mark);
    }

    let last = match last {
        Some(last) => Some(last),
        None => read_rank_history(&path)?.last().copied(),
    };
    if let Some(last) = last
        && last.rank == rank
    {
        return Ok(last);
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(&path)
        .map_err(Error::io(&path))?;
    file.write_all(&encode_rank(last, mark))
        .map_err(Error::io(&path))?;
    Ok(mark)
}
