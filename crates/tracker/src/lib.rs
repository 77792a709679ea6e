#![forbid(unsafe_code)]

pub mod clock;
pub mod domain;
mod engine;
mod error;
pub mod feed;
pub mod output;
pub mod query;

pub use clock::{Clock, SystemClock};
pub use domain::{ServerAddr, ServerFlags, ServerState};
pub use engine::{ControlEvent, Services, TickReport, Tracker};
pub use error::Error;
pub use feed::{FeedEntry, ServerFeed, StaticFeed};
pub use query::{NoQuery, PlayerQuery};
