#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::{ServerAddr, ServerState};
use crate::error::Error;
use crate::feed::{FeedEntry, ServerFeed};
use crate::output::{self, RankLine, Snapshot, SnapshotServer};
use crate::query::PlayerQuery;
use config::Config;
use history::{HistoryStore, RankMark, assign_ranks, record_rank};
use rayon::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Services {
    pub feed: Box<dyn ServerFeed + Send + Sync>,
    pub query: Box<dyn PlayerQuery + Send + Sync>,
    pub clock: Box<dyn Clock + Send + Sync>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Log a summary of every tracked server.
    DumpState,
    /// Recompute ranks now.
    Rerank,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub time: u32,
    /// The feed could not be fetched and nothing was done.
    pub skipped: bool,
    pub listed: usize,
    pub new_servers: usize,
    pub unarchived: usize,
    pub unreachable: usize,
    pub archived: usize,
    pub quarantined: usize,
    pub queried: usize,
    pub query_failed: usize,
    pub ranked: bool,
}

pub struct Tracker {
    config: Config,
    services: Services,
    store: HistoryStore,
    servers: HashMap<ServerAddr, ServerState>,
    last_update_time: u32,
    last_rank_time: u32,
}

fn secs(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}

impl Tracker {
    /// Rebuild the in-memory state from the active histories.
    ///
    /// Any unreadable history aborts. Every reachable server gets a
    /// zero-length outage at its last write time to mark the downtime of the
    /// tracker itself.
    pub fn load(config: Config, services: Services) -> Result<Self, Error> {
        let store = HistoryStore::from_config(&config);
        store.layout().ensure_dirs()?;
        let now = services.clock.now_secs();

        let snapshot_path = config.tracker.snapshot_path();
        let previous = match output::read_snapshot(&snapshot_path) {
            Ok(previous) => previous.unwrap_or_default(),
            Err(err) => {
                warn!(%err, "ignoring previous snapshot");
                Snapshot::default()
            }
        };

        let mut servers = HashMap::new();
        for id in store.list_active()? {
            let addr = match ServerAddr::from_id(&id) {
                Ok(addr) => addr,
                Err(err) => {
                    warn!(%err, "skipping history");
                    continue;
                }
            };
            let replay = store.replay_full(&id, now)?;
            let mut state = ServerState::new(addr);
            state.tail = replay.tail;
            state.rank_sum = replay.rank_sum;
            state.last_response_time = replay.tail.last_write_time;
            if let Some(known) = previous.servers.get(&id) {
                restore(&mut state, known);
            }
            state.last_rank = last_rank_mark(&store, &id)?;
            state.rank = state.last_rank.map_or(0, |mark| mark.rank);

            if !state.tail.is_fresh() && !state.tail.unreachable {
                let at = state.tail.last_write_time;
                store.append_observation(&id, &mut state.tail, 0, true, at)?;
                state.forget_players();
            }
            servers.insert(addr, state);
        }

        info!(servers = servers.len(), now, "history loaded");
        Ok(Self {
            config,
            services,
            store,
            servers,
            last_update_time: previous.last_update_time,
            last_rank_time: previous.last_rank_time,
        })
    }

    pub fn servers(&self) -> &HashMap<ServerAddr, ServerState> {
        &self.servers
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// One poll cycle.
    pub async fn tick(&mut self) -> Result<TickReport, Error> {
        let started = self.services.clock.now_millis();
        let now = self.services.clock.now_secs();
        let mut report = TickReport {
            time: now,
            ..Default::default()
        };

        let entries = match self.services.feed.fetch().await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "skipping poll");
                report.skipped = true;
                return Ok(report);
            }
        };
        report.listed = entries.len();

        self.apply_feed(entries, now, &mut report);
        self.expire(now, &mut report);
        if self.config.query.enabled {
            self.query_players(&mut report).await;
        }
        if now.saturating_sub(self.last_rank_time) >= secs(self.config.rank.update_interval) {
            match self.update_ranks(now) {
                Ok(()) => report.ranked = true,
                Err(err) => error!(%err, "rank update failed"),
            }
        }

        self.last_update_time = now;
        self.write_snapshot()?;

        debug!(
            ?report,
            elapsed_ms = self.services.clock.now_millis().saturating_sub(started),
            "tick done"
        );
        Ok(report)
    }

    fn apply_feed(&mut self, entries: Vec<FeedEntry>, now: u32, report: &mut TickReport) {
        let mut corrupt = Vec::new();

        for entry in entries {
            let addr = match entry.addr.parse::<ServerAddr>() {
                Ok(addr) => addr,
                Err(err) => {
                    debug!(%err, name = %entry.name, "skipping listed server");
                    continue;
                }
            };
            let id = addr.id();

            let state = match self.servers.entry(addr) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => match revive(&self.store, addr, &id, now) {
                    Ok(Some(state)) => {
                        info!(%addr, name = %entry.name, "known server is back, history unarchived");
                        report.unarchived += 1;
                        vacant.insert(state)
                    }
                    Ok(None) => {
                        info!(%addr, name = %entry.name, "new server");
                        report.new_servers += 1;
                        vacant.insert(ServerState::new(addr))
                    }
                    Err(err) if err.is_corrupt() => {
                        error!(%addr, %err, "unarchived history is corrupt");
                        corrupt.push(addr);
                        continue;
                    }
                    Err(err) => {
                        warn!(%addr, %err, "failed to unarchive history");
                        continue;
                    }
                },
            };

            let was_unreachable = state.tail.unreachable;
            let players = clamp_u8(entry.players);
            state.name = entry.name;
            state.map = entry.map;
            state.players = players;
            state.max_players = clamp_u8(entry.max_players);
            state.bots = clamp_u8(entry.bots);
            state.flags = entry.flags;
            state.last_response_time = now;

            match self
                .store
                .append_observation(&id, &mut state.tail, players, false, now)
            {
                Ok(_) => {
                    if was_unreachable && !state.tail.unreachable {
                        info!(%addr, name = state.display_name(), "server responding again");
                    }
                }
                Err(err) if err.is_corrupt() => {
                    error!(%addr, %err, "history is corrupt");
                    corrupt.push(addr);
                }
                Err(err) => warn!(%addr, %err, "failed to write history"),
            }
        }

        report.quarantined += corrupt.len();
        for addr in corrupt {
            self.drop_corrupt(addr, now);
        }
    }

    /// Write unreachable records for silent servers and archive dead ones.
    fn expire(&mut self, now: u32, report: &mut TickReport) {
        let unreachable_after = secs(self.config.tracker.unreachable_time);
        let dead_after = secs(self.config.tracker.dead_time);
        let mut dead = Vec::new();
        let mut corrupt = Vec::new();

        for (addr, state) in &mut self.servers {
            let silent = now.saturating_sub(state.last_response_time);
            if silent > dead_after {
                dead.push(*addr);
                continue;
            }
            if silent <= unreachable_after || state.tail.unreachable {
                continue;
            }
            match self
                .store
                .append_observation(&addr.id(), &mut state.tail, 0, true, now)
            {
                Ok(_) => {
                    info!(%addr, name = state.display_name(), silent, "server unreachable");
                    report.unreachable += 1;
                    state.forget_players();
                }
                Err(err) if err.is_corrupt() => {
                    error!(%addr, %err, "history is corrupt");
                    corrupt.push(*addr);
                }
                Err(err) => warn!(%addr, %err, "failed to write history"),
            }
        }

        for addr in dead {
            match self.store.archive(&addr.id()) {
                Ok(()) => {
                    if let Some(state) = self.servers.remove(&addr) {
                        info!(%addr, name = state.display_name(), "server dead, history archived");
                    }
                    report.archived += 1;
                }
                Err(err) => warn!(%addr, %err, "failed to archive history"),
            }
        }

        report.quarantined += corrupt.len();
        for addr in corrupt {
            self.drop_corrupt(addr, now);
        }
    }

    async fn query_players(&mut self, report: &mut TickReport) {
        let addrs: Vec<_> = self
            .servers
            .values()
            .filter(|state| !state.tail.unreachable)
            .map(|state| state.addr.socket())
            .collect();
        if addrs.is_empty() {
            return;
        }

        let results = self.services.query.query(addrs).await;
        report.queried = results.len();
        for (addr, result) in results {
            let Some(state) = self.servers.get_mut(&ServerAddr::from(addr)) else {
                warn!(%addr, "query result for an unknown server");
                continue;
            };
            match result {
                Ok(players) => {
                    state.players_list = players;
                    state.query_ok = true;
                }
                Err(err) => {
                    debug!(%err, "player query failed");
                    state.players_list.clear();
                    state.query_ok = false;
                    report.query_failed += 1;
                }
            }
        }
    }

    /// Recompute every rank sum, assign positions and publish the rank list.
    pub fn update_ranks(&mut self, now: u32) -> Result<(), Error> {
        let sums: Vec<_> = {
            let store = &self.store;
            self.servers
                .keys()
                .copied()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|addr| (addr, store.compute_rank_sum(&addr.id(), now)))
                .collect()
        };

        let mut corrupt = Vec::new();
        for (addr, sum) in sums {
            let Some(state) = self.servers.get_mut(&addr) else {
                continue;
            };
            match sum {
                Ok(sum) => state.rank_sum = sum,
                Err(err) if err.is_corrupt() => {
                    error!(%addr, %err, "history is corrupt");
                    corrupt.push(addr);
                }
                Err(err) => warn!(%addr, %err, "keeping previous rank sum"),
            }
        }
        for addr in corrupt {
            self.drop_corrupt(addr, now);
        }

        let ranked = assign_ranks(
            self.servers
                .iter()
                .map(|(addr, state)| (*addr, state.rank_sum)),
        );
        for entry in &ranked {
            let Some(state) = self.servers.get_mut(&entry.key) else {
                continue;
            };
            state.rank = entry.rank;
            match record_rank(
                self.store.layout(),
                &entry.key.id(),
                state.last_rank,
                entry.rank,
                now,
            ) {
                Ok(mark) => state.last_rank = Some(mark),
                Err(err) => warn!(addr = %entry.key, %err, "failed to write rank history"),
            }
        }

        let window = self.store.window();
        let lines = ranked
            .iter()
            .filter(|entry| entry.rank > 0)
            .filter_map(|entry| {
                let state = self.servers.get(&entry.key)?;
                Some(RankLine {
                    rank_sum: entry.rank_sum,
                    addr: entry.key,
                    name: &state.name,
                })
            });
        let text = output::render_rank_list(window.window, window.interval, lines);
        history::write_atomic(&self.config.tracker.rank_list_path(), text.as_bytes())?;

        self.last_rank_time = now;
        let top = ranked.first().filter(|entry| entry.rank > 0);
        info!(
            servers = ranked.len(),
            ranked = ranked.iter().filter(|entry| entry.rank > 0).count(),
            top = ?top.map(|entry| entry.key),
            "ranks updated"
        );
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            last_update_time: self.last_update_time,
            last_rank_time: self.last_rank_time,
            rank_freq: self.config.rank.update_interval.as_secs(),
            unreachable_time: self.config.tracker.unreachable_time.as_secs(),
            rank_window: self.config.rank.window.as_secs(),
            rank_interval: self.config.rank.interval.as_secs(),
            servers: self
                .servers
                .values()
                .map(|state| (state.addr.id(), SnapshotServer::from(state)))
                .collect(),
        }
    }

    pub fn write_snapshot(&self) -> Result<(), Error> {
        output::write_snapshot(&self.config.tracker.snapshot_path(), &self.snapshot())
    }

    /// Run poll cycles until the cancellation token is triggered.
    pub async fn run_until(
        &mut self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Result<(), Error> {
        let poll = self.config.tracker.poll_interval;
        loop {
            let started = self.services.clock.now_millis();
            if let Err(err) = self.tick().await {
                error!(%err, "poll cycle failed");
            }

            let deadline = started.saturating_add(poll.as_millis() as u64);
            loop {
                let remaining = deadline.saturating_sub(self.services.clock.now_millis());
                if remaining == 0 {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(err) = self.write_snapshot() {
                            warn!(%err, "failed to write final snapshot");
                        }
                        info!("shutdown requested");
                        return Ok(());
                    }
                    Some(event) = control_rx.recv() => {
                        if let Err(err) = self.handle_control(event) {
                            error!(%err, ?event, "control event failed");
                        }
                    }
                    _ = self.services.clock.sleep(Duration::from_millis(remaining)) => {}
                }
            }
        }
    }

    fn handle_control(&mut self, event: ControlEvent) -> Result<(), Error> {
        match event {
            ControlEvent::DumpState => self.dump_state(),
            ControlEvent::Rerank => {
                let now = self.services.clock.now_secs();
                self.update_ranks(now)?;
                self.write_snapshot()?;
            }
        }
        Ok(())
    }

    fn dump_state(&self) {
        let mut states: Vec<_> = self.servers.values().collect();
        states.sort_by_key(|state| (state.rank == 0, state.rank, state.addr));
        for state in &states {
            info!(
                addr = %state.addr,
                name = state.display_name(),
                players = state.players,
                max_players = state.max_players,
                unreachable = state.unreachable(),
                rank = state.rank,
                rank_sum = state.rank_sum,
                last_response_time = state.last_response_time,
                "server"
            );
        }
        info!(
            servers = states.len(),
            unreachable = states.iter().filter(|state| state.unreachable()).count(),
            last_update_time = self.last_update_time,
            last_rank_time = self.last_rank_time,
            "state dump"
        );
    }

    fn drop_corrupt(&mut self, addr: ServerAddr, now: u32) {
        self.servers.remove(&addr);
        if let Err(err) = self.store.quarantine(&addr.id(), now) {
            error!(%addr, %err, "failed to quarantine history");
        }
    }
}

fn clamp_u8(value: u32) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

fn restore(state: &mut ServerState, known: &SnapshotServer) {
    state.name.clone_from(&known.name);
    state.map.clone_from(&known.map);
    state.max_players = known.max_players;
    state.bots = known.bots;
    state.flags = crate::domain::ServerFlags::from_bits_truncate(known.flags);
    state.last_response_time = state.last_response_time.max(known.time);
}

fn last_rank_mark(store: &HistoryStore, id: &str) -> Result<Option<RankMark>, Error> {
    let path = store.layout().rank(id);
    if !path.is_file() {
        return Ok(None);
    }
    Ok(history::rank::read_rank_history(&path)?.last().copied())
}

/// Bring an archived server back. `None` when there is no archive.
fn revive(
    store: &HistoryStore,
    addr: ServerAddr,
    id: &str,
    now: u32,
) -> Result<Option<ServerState>, history::Error> {
    if !store.is_archived(id) {
        return Ok(None);
    }
    store.unarchive(id)?;
    let replay = store.replay_full(id, now)?;
    let mut state = ServerState::new(addr);
    state.tail = replay.tail;
    state.rank_sum = replay.rank_sum;
    let rank_path = store.layout().rank(id);
    if rank_path.is_file() {
        match history::rank::read_rank_history(&rank_path) {
            Ok(marks) => state.last_rank = marks.last().copied(),
            Err(err) => warn!(%addr, %err, "ignoring rank history"),
        }
    }
    state.rank = state.last_rank.map_or(0, |mark| mark.rank);
    Ok(Some(state))
}
