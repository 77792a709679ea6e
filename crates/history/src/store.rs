//! Lifecycle of the per-server history files.

use crate::Error;
use crate::codec::{HEADER_LEN, HISTORY_MAGIC, Header, ServerRecord, Tail, encode_record};
use crate::layout::{EXTENSION, Layout, remove_if_exists};
use crate::rank::{self, RankWindow, Replay};
use crate::views::{self, ViewParams};
use glob::{Pattern, glob};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An active history opened for appending.
#[derive(Debug)]
pub struct HistoryStream {
    path: PathBuf,
    file: File,
    created: bool,
}

impl HistoryStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when the file did not exist before it was opened.
    pub fn created(&self) -> bool {
        self.created
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.file
            .write_all(bytes)
            .map_err(Error::io(&self.path))
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    layout: Layout,
    window: RankWindow,
    views: Option<ViewParams>,
}

impl HistoryStore {
    pub fn new(layout: Layout, window: RankWindow, views: Option<ViewParams>) -> Self {
        Self {
            layout,
            window,
            views,
        }
    }

    pub fn from_config(config: &config::Config) -> Self {
        let views = config.views.enabled.then(|| ViewParams::from(config));
        Self::new(
            Layout::new(&config.tracker.data_dir),
            RankWindow::from(&config.rank),
            views,
        )
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn window(&self) -> RankWindow {
        self.window
    }

    /// Open the active history of `id`, creating it with a header if needed.
    pub fn create_or_open(&self, id: &str) -> Result<HistoryStream, Error> {
        let path = self.layout.history(id);
        match OpenOptions::new().append(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&Header::new(HISTORY_MAGIC).encode())
                    .map_err(Error::io(&path))?;
                debug!(id, "history created");
                return Ok(HistoryStream {
                    path,
                    file,
                    created: true,
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let dir = self.layout.stats_dir();
                fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
                return self.create_or_open(id);
            }
            Err(err) => return Err(Error::io(&path)(err)),
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&path)
            .map_err(Error::io(&path))?;
        let mut header = Vec::with_capacity(HEADER_LEN);
        (&mut file)
            .take(HEADER_LEN as u64)
            .read_to_end(&mut header)
            .map_err(Error::io(&path))?;
        Header::verify(&header, HISTORY_MAGIC).map_err(Error::corrupt(&path))?;

        Ok(HistoryStream {
            path,
            file,
            created: false,
        })
    }

    /// Record an observation of `id`. Returns `false` when the state did not
    /// change and nothing was written. `tail` is only updated once the bytes
    /// are on disk.
    pub fn append_observation(
        &self,
        id: &str,
        tail: &mut Tail,
        player_count: u8,
        unreachable: bool,
        now: u32,
    ) -> Result<bool, Error> {
        let mut record = ServerRecord::new(player_count, unreachable, now);
        if tail.holds(&record) {
            return Ok(false);
        }

        let mut stream = self.create_or_open(id)?;
        if stream.created() && !tail.is_fresh() {
            warn!(id, "history was missing, starting a new one");
            *tail = Tail::fresh();
        }
        if record.timestamp < tail.last_write_time {
            warn!(
                id,
                now,
                last_write_time = tail.last_write_time,
                "clock went backwards, reusing last write time"
            );
            record.timestamp = tail.last_write_time;
        }

        let Some(encoded) = encode_record(tail, &record, false) else {
            return Ok(false);
        };
        stream.append(encoded.as_bytes())?;
        tail.apply(&record);

        if let Some(params) = self.views
            && let Err(err) = views::rebuild(&self.layout, id, now, params)
        {
            warn!(id, %err, "failed to rebuild views");
        }
        Ok(true)
    }

    /// Decode the whole active history of `id`, computing its rank sum.
    pub fn replay_full(&self, id: &str, now: u32) -> Result<Replay, Error> {
        let path = self.layout.history(id);
        let bytes = fs::read(&path).map_err(Error::io(&path))?;
        rank::replay(&bytes, self.window, now).map_err(Error::corrupt(&path))
    }

    pub fn compute_rank_sum(&self, id: &str, now: u32) -> Result<u32, Error> {
        self.replay_full(id, now).map(|replay| replay.rank_sum)
    }

    /// Move the history and rank history of `id` to the archive and drop its
    /// views. Nothing is moved when an archived copy already exists.
    pub fn archive(&self, id: &str) -> Result<(), Error> {
        let l = &self.layout;
        self.move_family(
            [
                (l.history(id), l.history_archive(id), l.archive_dir()),
                (l.rank(id), l.rank_archive(id), l.rank_archive_dir()),
            ],
            id,
        )?;
        for view in [l.live(id), l.avg(id)] {
            remove_if_exists(&view)?;
        }
        info!(id, "history archived");
        Ok(())
    }

    /// Move an archived history (and rank history) of `id` back to active.
    pub fn unarchive(&self, id: &str) -> Result<(), Error> {
        let l = &self.layout;
        self.move_family(
            [
                (l.history_archive(id), l.history(id), l.stats_dir()),
                (l.rank_archive(id), l.rank(id), l.rank_dir()),
            ],
            id,
        )?;
        info!(id, "history unarchived");
        Ok(())
    }

    fn move_family(&self, moves: [(PathBuf, PathBuf, PathBuf); 2], id: &str) -> Result<(), Error> {
        for (from, to, _) in &moves {
            if from.exists() && to.exists() {
                return Err(Error::ArchiveConflict { path: to.clone() });
            }
        }
        for (from, to, dir) in &moves {
            if !from.exists() {
                debug!(id, path = ?from, "nothing to move");
                continue;
            }
            fs::create_dir_all(dir).map_err(Error::io(dir))?;
            fs::rename(from, to).map_err(Error::io(from))?;
        }
        Ok(())
    }

    /// Move the active files of `id` out of the way after a decode failure.
    /// Returns the new location of the history, if there was one.
    pub fn quarantine(&self, id: &str, now: u32) -> Result<Option<PathBuf>, Error> {
        let l = &self.layout;
        let name = format!("{id}.{now}.{EXTENSION}");
        let mut moved = None;
        for (from, dir) in [
            (l.history(id), l.corrupt_dir()),
            (l.rank(id), l.rank_corrupt_dir()),
        ] {
            if !from.exists() {
                continue;
            }
            fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
            let to = dir.join(&name);
            fs::rename(&from, &to).map_err(Error::io(&from))?;
            moved.get_or_insert(to);
        }
        for view in [l.live(id), l.avg(id)] {
            remove_if_exists(&view)?;
        }
        warn!(id, path = ?moved, "history quarantined");
        Ok(moved)
    }

    /// Ids of every active history.
    pub fn list_active(&self) -> Result<Vec<String>, Error> {
        list_ids(&self.layout.stats_dir())
    }

    /// Ids of every archived history.
    pub fn list_archived(&self) -> Result<Vec<String>, Error> {
        list_ids(&self.layout.archive_dir())
    }

    pub fn is_archived(&self, id: &str) -> bool {
        self.layout.history_archive(id).is_file()
    }
}

fn list_ids(dir: &Path) -> Result<Vec<String>, Error> {
    let Some(dir_str) = dir.to_str() else {
        return Err(Error::InvalidPath(dir.to_path_buf()));
    };
    let pattern = format!("{}/*.{EXTENSION}", Pattern::escape(dir_str));
    let paths = glob(&pattern).map_err(|_| Error::InvalidPath(dir.to_path_buf()))?;

    let mut ids = Vec::new();
    for path in paths {
        let path = path?;
        if !path.is_file() {
            continue;
        }
        match path.file_stem().and_then(|stem| stem.to_str()) {
            Some(stem) => ids.push(stem.to_owned()),
            None => warn!(?path, "skipping history with a non UTF-8 name"),
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Records, SENTINEL_PLAYERS};
    use pretty_assertions::assert_eq;

    fn store(root: &Path) -> HistoryStore {
        HistoryStore::new(Layout::new(root), RankWindow::new(180, 60), None)
    }

    #[test]
    fn first_append_creates_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut tail = Tail::fresh();

        assert!(store.append_observation("s", &mut tail, 4, false, 1000).unwrap());
        assert_eq!(tail.player_count, 4);
        assert_eq!(tail.last_write_time, 1000);

        let bytes = fs::read(store.layout().history("s")).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 5);
    }

    #[test]
    fn unchanged_state_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut tail = Tail::fresh();
        store.append_observation("s", &mut tail, 4, false, 1000).unwrap();
        let before = tail;

        assert!(!store.append_observation("s", &mut tail, 4, false, 1200).unwrap());
        assert_eq!(tail, before);
        let bytes = fs::read(store.layout().history("s")).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 5);
    }

    #[test]
    fn backwards_clock_reuses_last_write_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut tail = Tail::fresh();
        store.append_observation("s", &mut tail, 4, false, 1000).unwrap();
        store.append_observation("s", &mut tail, 5, false, 900).unwrap();
        assert_eq!(tail.last_write_time, 1000);

        let bytes = fs::read(store.layout().history("s")).unwrap();
        let times: Vec<_> = Records::from_stream(&bytes, HISTORY_MAGIC)
            .unwrap()
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(times, vec![1000, 1000]);
    }

    #[test]
    fn missing_file_resets_a_stale_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut tail = Tail {
            player_count: 2,
            unreachable: false,
            last_write_time: 500,
        };
        assert!(store.append_observation("s", &mut tail, 3, false, 1000).unwrap());
        assert_ne!(tail.player_count, SENTINEL_PLAYERS);

        let replay = store.replay_full("s", 1000).unwrap();
        assert_eq!(replay.tail, tail);
        assert_eq!(replay.records, 1);
    }

    #[test]
    fn open_rejects_a_foreign_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::create_dir_all(store.layout().stats_dir()).unwrap();
        fs::write(store.layout().history("s"), b"\x01\0\0\0XXXX").unwrap();

        let err = store.create_or_open("s").unwrap_err();
        assert!(err.is_corrupt(), "{err}");
    }

    #[test]
    fn quarantine_moves_both_families() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut tail = Tail::fresh();
        store.append_observation("s", &mut tail, 1, false, 100).unwrap();
        rank::record_rank(store.layout(), "s", None, 1, 100).unwrap();

        let moved = store.quarantine("s", 4242).unwrap().unwrap();
        assert_eq!(moved, store.layout().corrupt_dir().join("s.4242.dat"));
        assert!(
            store
                .layout()
                .rank_corrupt_dir()
                .join("s.4242.dat")
                .is_file()
        );
        assert!(store.list_active().unwrap().is_empty());
    }

    #[test]
    fn listing_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut tail = Tail::fresh();
        store.append_observation("b", &mut tail, 1, false, 100).unwrap();
        let mut tail = Tail::fresh();
        store.append_observation("a", &mut tail, 1, false, 100).unwrap();
        fs::write(store.layout().stats_dir().join("c.dat.tmp"), b"").unwrap();

        assert_eq!(store.list_active().unwrap(), vec!["a", "b"]);
        assert!(store.list_archived().unwrap().is_empty());
    }
}
