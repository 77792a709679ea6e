#![forbid(unsafe_code)]

use a2s::{Player, QueryResults};
use async_trait::async_trait;
use config::Config;
use history::codec::{HISTORY_MAGIC, Records};
use pretty_assertions::assert_eq;
use std::fs;
use std::net::SocketAddrV4;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracker::output::read_snapshot;
use tracker::{
    Clock, ControlEvent, Error, FeedEntry, NoQuery, PlayerQuery, ServerAddr, ServerFeed,
    ServerFlags, Services, Tracker,
};

const BASE: u32 = 1_000_000;

/// Epoch clock driven by tokio's (paused) time.
struct TestClock {
    start: Instant,
}

#[async_trait]
impl Clock for TestClock {
    fn now_secs(&self) -> u32 {
        BASE + self.start.elapsed().as_secs() as u32
    }

    fn now_millis(&self) -> u64 {
        u64::from(BASE) * 1000 + self.start.elapsed().as_millis() as u64
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Feed whose content the test changes between ticks. `None` means offline.
#[derive(Clone, Default)]
struct ScriptedFeed(Arc<Mutex<Option<Vec<FeedEntry>>>>);

impl ScriptedFeed {
    fn set(&self, entries: Option<Vec<FeedEntry>>) {
        *self.0.lock().unwrap() = entries;
    }
}

#[async_trait]
impl ServerFeed for ScriptedFeed {
    async fn fetch(&self) -> Result<Vec<FeedEntry>, Error> {
        self.0
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Feed("offline".into()))
    }
}

/// Every server answers with a single player.
struct OnePlayer;

#[async_trait]
impl PlayerQuery for OnePlayer {
    async fn query(&self, addrs: Vec<SocketAddrV4>) -> QueryResults {
        addrs
            .into_iter()
            .map(|addr| {
                let player = Player {
                    index: 0,
                    name: "gordon".into(),
                    score: 7,
                    duration: 12.0,
                };
                (addr, Ok(vec![player]))
            })
            .collect()
    }
}

fn entry(addr: &str, name: &str, players: u32) -> FeedEntry {
    FeedEntry {
        addr: addr.into(),
        name: name.into(),
        map: "svencoop1".into(),
        players,
        max_players: 32,
        bots: 0,
        flags: ServerFlags::DEDICATED | ServerFlags::LINUX,
    }
}

fn config(dir: &Path) -> Config {
    let mut config = Config::new();
    config.tracker.data_dir = dir.to_path_buf();
    config.tracker.unreachable_time = Duration::from_secs(300);
    config.tracker.dead_time = Duration::from_secs(1000);
    config.query.enabled = false;
    config
}

fn services(feed: &ScriptedFeed) -> Services {
    Services {
        feed: Box::new(feed.clone()),
        query: Box::new(NoQuery),
        clock: Box::new(TestClock {
            start: Instant::now(),
        }),
    }
}

fn history(dir: &Path, id: &str) -> Vec<(u8, bool, u32)> {
    let bytes = fs::read(dir.join("stats").join(format!("{id}.dat"))).unwrap();
    Records::from_stream(&bytes, HISTORY_MAGIC)
        .unwrap()
        .map(|record| {
            let record = record.unwrap();
            (record.player_count, record.unreachable, record.timestamp)
        })
        .collect()
}

const ALPHA: &str = "10.0.0.1:27015";
const ALPHA_ID: &str = "10.0.0.1_27015";
const BETA: &str = "10.0.0.2:27015";

#[tokio::test(start_paused = true)]
async fn new_server_is_tracked_and_published() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 5), entry("garbage", "x", 1)]));
    let mut tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();

    let report = tracker.tick().await.unwrap();
    assert_eq!(report.listed, 2);
    assert_eq!(report.new_servers, 1);
    assert!(report.ranked);
    assert_eq!(history(dir.path(), ALPHA_ID), vec![(5, false, BASE)]);

    let snapshot = read_snapshot(&dir.path().join("tracker.json"))
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.last_update_time, BASE);
    assert_eq!(snapshot.unreachable_time, 300);
    let alpha = &snapshot.servers[ALPHA_ID];
    assert_eq!(alpha.name, "alpha");
    assert_eq!(alpha.players, 5);
    assert_eq!(alpha.flags, 5);
    assert!(!alpha.unreachable);
    assert!(dir.path().join("ranks.txt").is_file());
}

#[tokio::test(start_paused = true)]
async fn offline_feed_skips_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ScriptedFeed::default();
    let mut tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();

    let report = tracker.tick().await.unwrap();
    assert!(report.skipped);
    assert!(!dir.path().join("tracker.json").exists());
}

#[tokio::test(start_paused = true)]
async fn silent_server_goes_unreachable_then_dead_then_back() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 3)]));
    let mut tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();
    tracker.tick().await.unwrap();

    feed.set(Some(Vec::new()));
    tokio::time::advance(Duration::from_secs(301)).await;
    let report = tracker.tick().await.unwrap();
    assert_eq!(report.unreachable, 1);
    let addr: ServerAddr = ALPHA.parse().unwrap();
    assert!(tracker.servers()[&addr].unreachable());
    assert_eq!(
        history(dir.path(), ALPHA_ID),
        vec![(3, false, BASE), (0, true, BASE + 301)]
    );

    tokio::time::advance(Duration::from_secs(1000)).await;
    let report = tracker.tick().await.unwrap();
    assert_eq!(report.archived, 1);
    assert!(tracker.servers().is_empty());
    assert!(tracker.store().is_archived(ALPHA_ID));

    feed.set(Some(vec![entry(ALPHA, "alpha", 3)]));
    tokio::time::advance(Duration::from_secs(60)).await;
    let report = tracker.tick().await.unwrap();
    assert_eq!(report.unarchived, 1);
    assert!(!tracker.servers()[&addr].unreachable());
    assert_eq!(
        history(dir.path(), ALPHA_ID),
        vec![(3, false, BASE), (0, true, BASE + 301), (3, false, BASE + 1361)]
    );
}

#[tokio::test(start_paused = true)]
async fn restart_marks_the_outage() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 5)]));
    let mut tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();
    tracker.tick().await.unwrap();
    drop(tracker);

    tokio::time::advance(Duration::from_secs(10)).await;
    let tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();
    let addr: ServerAddr = ALPHA.parse().unwrap();
    let state = &tracker.servers()[&addr];
    assert!(state.unreachable());
    assert_eq!(state.name, "alpha");
    assert_eq!(
        history(dir.path(), ALPHA_ID),
        vec![(5, false, BASE), (0, true, BASE)]
    );
}

#[tokio::test(start_paused = true)]
async fn corrupt_history_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("stats")).unwrap();
    fs::write(
        dir.path().join("stats").join(format!("{ALPHA_ID}.dat")),
        b"\x02\0\0\0SVTK",
    )
    .unwrap();

    let feed = ScriptedFeed::default();
    match Tracker::load(config(dir.path()), services(&feed)) {
        Err(Error::History(err)) => assert!(err.is_corrupt(), "{err}"),
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("corrupt history was accepted"),
    }
}

#[tokio::test(start_paused = true)]
async fn runtime_corruption_quarantines_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 3)]));
    let mut tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();
    tracker.tick().await.unwrap();

    let path = dir.path().join("stats").join(format!("{ALPHA_ID}.dat"));
    fs::write(&path, b"\x01\0\0\0XXXX").unwrap();
    feed.set(Some(vec![entry(ALPHA, "alpha", 4)]));
    tokio::time::advance(Duration::from_secs(60)).await;

    let report = tracker.tick().await.unwrap();
    assert_eq!(report.quarantined, 1);
    assert!(tracker.servers().is_empty());
    assert!(!path.exists());
    let quarantined = dir
        .path()
        .join("stats/corrupt")
        .join(format!("{ALPHA_ID}.{}.dat", BASE + 60));
    assert!(quarantined.is_file());
}

#[tokio::test(start_paused = true)]
async fn ranks_follow_player_counts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.rank.window = Duration::from_secs(600);
    config.rank.interval = Duration::from_secs(60);
    config.rank.update_interval = Duration::from_secs(60);

    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 5), entry(BETA, "beta", 2)]));
    let mut tracker = Tracker::load(config, services(&feed)).unwrap();
    tracker.tick().await.unwrap();

    tokio::time::advance(Duration::from_secs(120)).await;
    let report = tracker.tick().await.unwrap();
    assert!(report.ranked);

    // two samples since the first observation hold the listed count
    let alpha = &tracker.servers()[&ALPHA.parse::<ServerAddr>().unwrap()];
    let beta = &tracker.servers()[&BETA.parse::<ServerAddr>().unwrap()];
    assert_eq!((alpha.rank_sum, alpha.rank), (10, 1));
    assert_eq!((beta.rank_sum, beta.rank), (4, 2));

    let list = fs::read_to_string(dir.path().join("ranks.txt")).unwrap();
    assert_eq!(
        list,
        format!("window=600\ninterval=60\n10={ALPHA}=alpha\n4={BETA}=beta\n")
    );
    assert!(dir.path().join("rank").join(format!("{ALPHA_ID}.dat")).is_file());
}

#[tokio::test(start_paused = true)]
async fn player_lists_reach_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.query.enabled = true;
    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 1)]));
    let services = Services {
        query: Box::new(OnePlayer),
        ..services(&feed)
    };
    let mut tracker = Tracker::load(config, services).unwrap();

    let report = tracker.tick().await.unwrap();
    assert_eq!((report.queried, report.query_failed), (1, 0));
    let snapshot = read_snapshot(&dir.path().join("tracker.json"))
        .unwrap()
        .unwrap();
    let players = snapshot.servers[ALPHA_ID].player_list.as_ref().unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].name, "gordon");
}

#[tokio::test(start_paused = true)]
async fn run_until_polls_and_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 2)]));
    let mut tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    control_tx.send(ControlEvent::Rerank).unwrap();
    control_tx.send(ControlEvent::DumpState).unwrap();
    let stop = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            cancel.cancel();
        }
    };

    let (result, ()) = tokio::join!(tracker.run_until(cancel, control_rx), stop);
    result.unwrap();

    let snapshot = read_snapshot(&dir.path().join("tracker.json"))
        .unwrap()
        .unwrap();
    // polls at 0, 60 and 120 seconds
    assert_eq!(snapshot.last_update_time, BASE + 120);
}

#[tokio::test(start_paused = true)]
async fn unwritable_rank_list_keeps_publishing() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("ranks.txt")).unwrap();
    let feed = ScriptedFeed::default();
    feed.set(Some(vec![entry(ALPHA, "alpha", 2)]));
    let mut tracker = Tracker::load(config(dir.path()), services(&feed)).unwrap();

    let report = tracker.tick().await.unwrap();
    assert!(!report.ranked);
    let snapshot = read_snapshot(&dir.path().join("tracker.json"))
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.last_update_time, BASE);

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    control_tx.send(ControlEvent::Rerank).unwrap();
    let stop = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            cancel.cancel();
        }
    };

    let (result, ()) = tokio::join!(tracker.run_until(cancel, control_rx), stop);
    result.unwrap();
    let snapshot = read_snapshot(&dir.path().join("tracker.json"))
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.last_update_time, BASE + 120);
}
