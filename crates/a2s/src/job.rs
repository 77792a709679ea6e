//! Per-server query state machine.
//!
//! Transitions are pure: they take the current time and return the next
//! state plus what to send, so they can be driven without a socket.

use crate::packet::{Player, Request, Response};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub max_attempts: u32,
    /// How long to wait for a reply before sending again.
    pub timeout: Duration,
}

impl From<&config::Query> for Policy {
    fn from(query: &config::Query) -> Self {
        Self {
            max_attempts: query.max_attempts.max(1),
            timeout: query.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Players(Vec<Player>),
    Failed { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    NotStarted {
        attempts: u32,
    },
    WaitChallenge {
        attempts: u32,
        sent_at: Instant,
    },
    GotChallenge {
        attempts: u32,
        challenge: i32,
    },
    WaitPlayers {
        attempts: u32,
        challenge: i32,
        sent_at: Instant,
    },
    Done(Outcome),
}

impl Default for JobState {
    fn default() -> Self {
        Self::NotStarted { attempts: 0 }
    }
}

impl JobState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Send whatever is due and expire requests older than the timeout.
    pub fn on_tick(self, now: Instant, policy: &Policy) -> (Self, Option<Request>) {
        match self {
            Self::NotStarted { attempts } => (
                Self::WaitChallenge {
                    attempts,
                    sent_at: now,
                },
                Some(Request::Challenge),
            ),
            Self::GotChallenge {
                attempts,
                challenge,
            } => (
                Self::WaitPlayers {
                    attempts,
                    challenge,
                    sent_at: now,
                },
                Some(Request::Players { challenge }),
            ),
            Self::WaitChallenge { attempts, sent_at }
                if now.saturating_duration_since(sent_at) > policy.timeout =>
            {
                (
                    retry(attempts, policy, |attempts| Self::NotStarted { attempts }),
                    None,
                )
            }
            Self::WaitPlayers {
                attempts,
                challenge,
                sent_at,
            } if now.saturating_duration_since(sent_at) > policy.timeout => (
                retry(attempts, policy, |attempts| Self::GotChallenge {
                    attempts,
                    challenge,
                }),
                None,
            ),
            state => (state, None),
        }
    }

    /// Handle a datagram from the server this job queries.
    pub fn on_response(self, response: Response, policy: &Policy) -> Self {
        match (self, response) {
            (Self::WaitChallenge { .. }, Response::Challenge(challenge)) => Self::GotChallenge {
                attempts: 0,
                challenge,
            },
            // some servers skip the challenge
            (Self::WaitChallenge { .. } | Self::WaitPlayers { .. }, Response::Players(players)) => {
                Self::Done(Outcome::Players(players))
            }
            (Self::WaitChallenge { attempts, .. }, _) => {
                trace!(attempts, "unexpected reply to a challenge request");
                retry(attempts, policy, |attempts| Self::NotStarted { attempts })
            }
            (Self::WaitPlayers { attempts, .. }, Response::Challenge(challenge)) => {
                trace!(attempts, "challenge renewed");
                retry(attempts, policy, |attempts| Self::GotChallenge {
                    attempts,
                    challenge,
                })
            }
            (
                Self::WaitPlayers {
                    attempts,
                    challenge,
                    ..
                },
                Response::Other,
            ) => {
                trace!(attempts, "unexpected reply to a player request");
                retry(attempts, policy, |attempts| Self::GotChallenge {
                    attempts,
                    challenge,
                })
            }
            (state, _) => state,
        }
    }
}

fn retry(attempts: u32, policy: &Policy, again: impl FnOnce(u32) -> JobState) -> JobState {
    let attempts = attempts.saturating_add(1);
    if attempts >= policy.max_attempts {
        JobState::Done(Outcome::Failed { attempts })
    } else {
        again(attempts)
    }
}
