#![forbid(unsafe_code)]

pub mod codec;
mod error;
pub mod layout;
pub mod rank;
pub mod store;
pub mod views;

pub use codec::{ServerRecord, Tail};
pub use error::Error;
pub use layout::{Layout, write_atomic};
pub use rank::{RankMark, RankWindow, Ranked, Replay, assign_ranks, record_rank};
pub use store::{HistoryStore, HistoryStream};
pub use views::ViewParams;
