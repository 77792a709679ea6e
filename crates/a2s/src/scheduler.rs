use crate::Error;
use crate::job::{JobState, Outcome, Policy};
use crate::packet::{Player, RECV_BUFFER_LEN, parse_response};
use crate::transport::Transport;
use std::collections::BTreeMap;
use std::mem;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Player list or failure of every queried server.
pub type QueryResults = BTreeMap<SocketAddrV4, Result<Vec<Player>, Error>>;

/// Job key of an address: IPv4 bits low, port above.
pub fn address_key(addr: &SocketAddrV4) -> u64 {
    u64::from(u32::from(*addr.ip())) | (u64::from(addr.port()) << 32)
}

#[derive(Debug)]
struct Job {
    addr: SocketAddrV4,
    state: JobState,
}

/// Runs A2S player queries against many servers from a single socket.
#[derive(Debug)]
pub struct Scheduler<T> {
    transport: T,
    policy: Policy,
    max_sends_per_tick: usize,
    tick_yield: Duration,
}

impl Scheduler<UdpSocket> {
    pub async fn bind(config: &config::Query) -> Result<Self, Error> {
        let socket = UdpSocket::bind(config.bind)
            .await
            .map_err(|source| Error::Bind {
                addr: config.bind,
                source,
            })?;
        debug!(addr = ?socket.local_addr().ok(), "query socket bound");
        Ok(Self::new(socket, config))
    }
}

impl<T: Transport> Scheduler<T> {
    pub fn new(transport: T, config: &config::Query) -> Self {
        let config = config.clamp();
        Self {
            transport,
            policy: Policy::from(&config),
            max_sends_per_tick: config.max_sends_per_tick as usize,
            tick_yield: config.tick_yield,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Query every address until each one answered or gave up.
    pub async fn run(&self, addrs: impl IntoIterator<Item = SocketAddrV4>) -> QueryResults {
        let mut jobs: BTreeMap<u64, Job> = addrs
            .into_iter()
            .map(|addr| {
                let job = Job {
                    addr,
                    state: JobState::default(),
                };
                (address_key(&addr), job)
            })
            .collect();

        let started = Instant::now();
        let mut buf = vec![0; RECV_BUFFER_LEN];
        let mut ticks = 0u64;
        while !jobs.values().all(|job| job.state.is_done()) {
            if ticks > 0 {
                tokio::time::sleep(self.tick_yield).await;
            }
            ticks += 1;
            self.send_due(&mut jobs, Instant::now());
            self.drain(&mut jobs, &mut buf);
        }

        let results: QueryResults = jobs
            .into_values()
            .map(|job| {
                let result = match job.state {
                    JobState::Done(Outcome::Players(players)) => Ok(players),
                    JobState::Done(Outcome::Failed { attempts }) => Err(Error::NetworkTimeout {
                        addr: job.addr,
                        attempts,
                    }),
                    // the loop only exits once every job is done
                    _ => Err(Error::NetworkTimeout {
                        addr: job.addr,
                        attempts: 0,
                    }),
                };
                (job.addr, result)
            })
            .collect();

        let failed = results.values().filter(|result| result.is_err()).count();
        info!(
            servers = results.len(),
            failed,
            ticks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query pass finished"
        );
        results
    }

    fn send_due(&self, jobs: &mut BTreeMap<u64, Job>, now: Instant) {
        let mut sent = 0;
        for job in jobs.values_mut() {
            if sent >= self.max_sends_per_tick {
                break;
            }
            let (state, request) = mem::take(&mut job.state).on_tick(now, &self.policy);
            job.state = state;
            let Some(request) = request else {
                continue;
            };
            if let Err(err) = self
                .transport
                .send_to(&request.encode(), SocketAddr::V4(job.addr))
            {
                debug!(addr = %job.addr, %err, "send failed");
            }
            sent += 1;
        }
    }

    fn drain(&self, jobs: &mut BTreeMap<u64, Job>, buf: &mut [u8]) {
        loop {
            let (len, from) = match self.transport.try_recv_from(buf) {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "receive failed");
                    break;
                }
            };
            let job = match from {
                SocketAddr::V4(from) => jobs.get_mut(&address_key(&from)),
                SocketAddr::V6(_) => None,
            };
            let Some(job) = job else {
                trace!(%from, len, "ignoring packet from unknown source");
                continue;
            };
            let response = parse_response(&buf[..len]);
            job.state = mem::take(&mut job.state).on_response(response, &self.policy);
        }
    }
}
