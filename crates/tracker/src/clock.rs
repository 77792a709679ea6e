#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Epoch seconds, the resolution of every stored timestamp.
    fn now_secs(&self) -> u32;
    fn now_millis(&self) -> u64;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    fn since_epoch() -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now_secs(&self) -> u32 {
        u32::try_from(Self::since_epoch().as_secs()).unwrap_or(u32::MAX)
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(Self::since_epoch().as_millis()).unwrap_or(u64::MAX)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
