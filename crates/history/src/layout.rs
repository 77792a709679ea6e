use crate::Error;
use std::fs;
use std::path::{Path, PathBuf};

const STATS_DIR: &str = "stats";
const RANK_DIR: &str = "rank";
const ARCHIVE_DIR: &str = "archive";
const CORRUPT_DIR: &str = "corrupt";
const LIVE_DIR: &str = "live";
const AVG_DIR: &str = "avg";
pub(crate) const EXTENSION: &str = "dat";

/// Where every file family lives below the data directory.
///
/// ```text
/// stats/<id>.dat           active history
/// stats/archive/<id>.dat   archived history
/// stats/live/<id>.dat      live view
/// stats/avg/<id>.dat       averaged view
/// stats/corrupt/           quarantined histories
/// rank/<id>.dat            active rank history
/// rank/archive/<id>.dat    archived rank history
/// rank/corrupt/            quarantined rank histories
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.root.join(STATS_DIR)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.stats_dir().join(ARCHIVE_DIR)
    }

    pub fn live_dir(&self) -> PathBuf {
        self.stats_dir().join(LIVE_DIR)
    }

    pub fn avg_dir(&self) -> PathBuf {
        self.stats_dir().join(AVG_DIR)
    }

    pub fn corrupt_dir(&self) -> PathBuf {
        self.stats_dir().join(CORRUPT_DIR)
    }

    pub fn rank_dir(&self) -> PathBuf {
        self.root.join(RANK_DIR)
    }

    pub fn rank_archive_dir(&self) -> PathBuf {
        self.rank_dir().join(ARCHIVE_DIR)
    }

    pub fn rank_corrupt_dir(&self) -> PathBuf {
        self.rank_dir().join(CORRUPT_DIR)
    }

    pub fn history(&self, id: &str) -> PathBuf {
        file_in(self.stats_dir(), id)
    }

    pub fn history_archive(&self, id: &str) -> PathBuf {
        file_in(self.archive_dir(), id)
    }

    pub fn live(&self, id: &str) -> PathBuf {
        file_in(self.live_dir(), id)
    }

    pub fn avg(&self, id: &str) -> PathBuf {
        file_in(self.avg_dir(), id)
    }

    pub fn rank(&self, id: &str) -> PathBuf {
        file_in(self.rank_dir(), id)
    }

    pub fn rank_archive(&self, id: &str) -> PathBuf {
        file_in(self.rank_archive_dir(), id)
    }

    /// Create every folder of the layout.
    pub fn ensure_dirs(&self) -> Result<(), Error> {
        for dir in [
            self.archive_dir(),
            self.live_dir(),
            self.avg_dir(),
            self.corrupt_dir(),
            self.rank_archive_dir(),
            self.rank_corrupt_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
        }
        Ok(())
    }
}

fn file_in(dir: PathBuf, id: &str) -> PathBuf {
    dir.join(format!("{id}.{EXTENSION}"))
}

/// Replace `path` with `bytes` by writing a sibling temp file and renaming it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(Error::io(&tmp))?;
    fs::rename(&tmp, path).map_err(Error::io(path))
}

/// Remove `path`, treating a missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::io(path)(err)),
    }
}
