#![forbid(unsafe_code)]

mod error;
pub mod job;
pub mod packet;
mod scheduler;
mod transport;

pub use error::Error;
pub use job::{JobState, Outcome, Policy};
pub use packet::{Player, Request, Response, parse_response};
pub use scheduler::{QueryResults, Scheduler, address_key};
pub use transport::Transport;
