//! Live and averaged copies of a history stream, rebuilt from scratch.

use crate::Error;
use crate::codec::{HISTORY_MAGIC, MAX_PLAYERS, Records, ServerRecord, StreamBuilder};
use crate::layout::{Layout, write_atomic};
use crate::rank::{Level, Resampler};
use std::fs;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewParams {
    /// Span kept by the live view.
    pub live_window: u32,
    /// Bucket length of the avg view.
    pub avg_interval: u32,
    /// Resolution of the samples averaged into a bucket.
    pub sample_interval: u32,
}

impl From<&config::Config> for ViewParams {
    fn from(config: &config::Config) -> Self {
        let secs = |d: std::time::Duration| u32::try_from(d.as_secs()).unwrap_or(u32::MAX);
        Self {
            live_window: secs(config.views.live_window),
            avg_interval: secs(config.views.avg_interval).max(1),
            sample_interval: secs(config.rank.interval).max(1),
        }
    }
}

/// Records of the last `window` seconds. The first one is written with an
/// absolute time since the copy does not start at the true origin.
pub fn live_view(records: &[ServerRecord], now: u32, window: u32) -> Vec<u8> {
    let since = now.saturating_sub(window);
    let mut builder = StreamBuilder::new(HISTORY_MAGIC);
    let mut first = true;
    for record in records.iter().filter(|r| r.timestamp >= since) {
        builder.push(record, first);
        first = false;
    }
    builder.finish()
}

#[derive(Debug, Default)]
struct Bucket {
    start: i64,
    sum: u64,
    samples: u32,
    unreachable: u32,
}

/// Rounded mean of the backfilled samples of every complete `avg_interval`
/// bucket, stamped at the bucket start. Like any history stream, a bucket is
/// only written when its mean differs from the previous one.
pub fn avg_view(records: &[ServerRecord], now: u32, params: ViewParams) -> Vec<u8> {
    let mut builder = StreamBuilder::new(HISTORY_MAGIC);
    let Some(first) = records.first() else {
        return builder.finish();
    };

    let avg = i64::from(params.avg_interval);
    let per_bucket = (params.avg_interval / params.sample_interval).max(1);
    let start = (i64::from(first.timestamp) / avg + 1) * avg;
    let end = i64::from(now);
    let mut resampler = Resampler::new(start, params.sample_interval);
    let mut bucket = Bucket {
        start,
        ..Default::default()
    };

    let mut on_sample = |time: i64, level: Level| {
        if bucket.samples == 0 {
            bucket.start = time;
        }
        bucket.samples += 1;
        bucket.sum += level.value();
        if level.unreachable {
            bucket.unreachable += 1;
        }
        if bucket.samples < per_bucket {
            return;
        }
        if bucket.start + avg > end {
            // the bucket's span has not elapsed yet
            bucket = Bucket::default();
            return;
        }

        let timestamp = u32::try_from(bucket.start).unwrap_or_default();
        let record = if bucket.unreachable == bucket.samples {
            ServerRecord::new(0, true, timestamp)
        } else {
            let mean = (bucket.sum as f64 / f64::from(bucket.samples)).round() as u64;
            let count = match u8::try_from(mean) {
                Ok(count) if count <= MAX_PLAYERS => count,
                _ => {
                    warn!(mean, timestamp, "average player count out of range, reset to 0");
                    0
                }
            };
            ServerRecord::new(count, false, timestamp)
        };
        builder.push(&record, false);
        bucket = Bucket::default();
    };

    for record in records {
        resampler.advance(i64::from(record.timestamp), &mut on_sample);
        resampler.set(Level {
            count: record.player_count,
            unreachable: record.unreachable,
        });
    }
    resampler.advance(end, &mut on_sample);

    builder.finish()
}

/// Rewrite the live and avg views of `id` from its active history.
pub fn rebuild(layout: &Layout, id: &str, now: u32, params: ViewParams) -> Result<(), Error> {
    let path = layout.history(id);
    let bytes = fs::read(&path).map_err(Error::io(&path))?;
    let records = Records::from_stream(&bytes, HISTORY_MAGIC)
        .map_err(Error::corrupt(&path))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::corrupt(&path))?;

    for dir in [layout.live_dir(), layout.avg_dir()] {
        fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
    }
    write_atomic(&layout.live(id), &live_view(&records, now, params.live_window))?;
    write_atomic(&layout.avg(id), &avg_view(&records, now, params))?;
    trace!(id, records = records.len(), "views rebuilt");
    Ok(())
}
