use history::codec::{HEADER_LEN, HISTORY_MAGIC, Records};
use history::{Error, HistoryStore, Layout, RankWindow, Tail, ViewParams, record_rank};
use pretty_assertions::assert_eq;
use std::fs;

const VIEWS: ViewParams = ViewParams {
    live_window: 3600,
    avg_interval: 300,
    sample_interval: 60,
};

fn store(root: &std::path::Path) -> HistoryStore {
    HistoryStore::new(Layout::new(root), RankWindow::new(600, 60), Some(VIEWS))
}

fn records(bytes: &[u8]) -> Vec<(u8, bool, u32)> {
    Records::from_stream(bytes, HISTORY_MAGIC)
        .unwrap()
        .map(|r| {
            let r = r.unwrap();
            (r.player_count, r.unreachable, r.timestamp)
        })
        .collect()
}

#[test]
fn archive_then_unarchive_restores_history_and_drops_views() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let layout = store.layout().clone();
    let mut tail = Tail::fresh();

    store.append_observation("s", &mut tail, 3, false, 1000).unwrap();
    store.append_observation("s", &mut tail, 0, true, 1400).unwrap();
    record_rank(&layout, "s", None, 2, 1400).unwrap();
    let history = fs::read(layout.history("s")).unwrap();
    assert!(layout.live("s").is_file());
    assert!(layout.avg("s").is_file());

    store.archive("s").unwrap();
    assert!(!layout.history("s").exists());
    assert!(!layout.live("s").exists());
    assert!(!layout.avg("s").exists());
    assert!(store.is_archived("s"));
    assert_eq!(store.list_archived().unwrap(), vec!["s"]);
    assert!(layout.rank_archive("s").is_file());

    store.unarchive("s").unwrap();
    assert!(!store.is_archived("s"));
    assert_eq!(fs::read(layout.history("s")).unwrap(), history);
    assert!(layout.rank("s").is_file());
    assert_eq!(store.replay_full("s", 1500).unwrap().tail, tail);
}

#[test]
fn archive_conflict_moves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let layout = store.layout().clone();
    let mut tail = Tail::fresh();
    store.append_observation("s", &mut tail, 3, false, 1000).unwrap();
    fs::create_dir_all(layout.archive_dir()).unwrap();
    fs::write(layout.history_archive("s"), b"stale").unwrap();

    let err = store.archive("s").unwrap_err();
    assert!(matches!(err, Error::ArchiveConflict { .. }), "{err}");
    assert!(layout.history("s").is_file());
    assert_eq!(fs::read(layout.history_archive("s")).unwrap(), b"stale");
}

#[test]
fn every_commit_refreshes_the_views() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let layout = store.layout().clone();
    let mut tail = Tail::fresh();

    store.append_observation("s", &mut tail, 10, false, 0).unwrap();
    store.append_observation("s", &mut tail, 20, false, 5000).unwrap();

    // 0 is older than the live window
    assert_eq!(
        records(&fs::read(layout.live("s")).unwrap()),
        vec![(20, false, 5000)]
    );
    let avg = records(&fs::read(layout.avg("s")).unwrap());
    assert_eq!(avg.first(), Some(&(10, false, 300)));
    assert!(avg.iter().all(|&(_, _, time)| time <= 5000 - 300));
}

#[test]
fn replay_rejects_a_truncated_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let layout = store.layout().clone();
    let mut tail = Tail::fresh();
    store.append_observation("s", &mut tail, 3, false, 1000).unwrap();

    let mut bytes = fs::read(layout.history("s")).unwrap();
    bytes.truncate(HEADER_LEN + 3);
    fs::write(layout.history("s"), bytes).unwrap();

    let err = store.replay_full("s", 2000).unwrap_err();
    assert!(err.is_corrupt(), "{err}");
}

#[test]
fn rank_sum_of_a_steady_server() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let mut tail = Tail::fresh();
    store.append_observation("s", &mut tail, 2, false, 0).unwrap();

    // samples at 400, 460, ..., 1000 all hold 2
    assert_eq!(store.compute_rank_sum("s", 1000).unwrap(), 2 * 11);
}
