use crate::snapshot::Snapshot;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to serialize baseline: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Alert episode tracking across runs.
///
/// `OpenUnnotified` only exists inside a run whose email could not be
/// delivered; stores persist it the same way as `NoEpisode`, so the next poll
/// tries again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpisodeState {
    #[default]
    NoEpisode,
    OpenUnnotified,
    OpenNotified,
}

impl EpisodeState {
    pub fn is_open(self) -> bool {
        !matches!(self, Self::NoEpisode)
    }
}

/// Persistent state of the detector: baseline, change log and episode flag.
pub trait StateStore {
    /// `Ok(None)` when no baseline has been written yet.
    fn load_baseline(&self) -> Result<Option<Snapshot>, StoreError>;
    /// Replaces the baseline as a whole; a crash leaves either the old or the
    /// new file in place.
    fn save_baseline(&mut self, snapshot: &Snapshot) -> Result<(), StoreError>;
    fn read_log(&self) -> Result<Vec<String>, StoreError>;
    fn rewrite_log(&mut self, lines: &[String]) -> Result<(), StoreError>;
    fn append_log(&mut self, line: &str) -> Result<(), StoreError>;
    fn episode(&self) -> Result<EpisodeState, StoreError>;
    fn set_episode(&mut self, state: EpisodeState) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    baseline_path: PathBuf,
    log_path: PathBuf,
    marker_path: PathBuf,
}

impl FileStore {
    pub fn new(
        baseline_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        marker_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            baseline_path: baseline_path.into(),
            log_path: log_path.into(),
            marker_path: marker_path.into(),
        }
    }
}

impl StateStore for FileStore {
    fn load_baseline(&self) -> Result<Option<Snapshot>, StoreError> {
        let bytes = match fs::read(&self.baseline_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&self.baseline_path, err)),
        };
        // Undecodable bytes are a content problem, not an I/O failure.
        let snapshot = serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: self.baseline_path.display().to_string(),
            source,
        })?;
        Ok(Some(snapshot))
    }

    fn save_baseline(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut text = snapshot.to_canonical_json()?;
        text.push('\n');
        write_atomic(&self.baseline_path, text.as_bytes())
            .map_err(|err| StoreError::io(&self.baseline_path, err))
    }

    fn read_log(&self) -> Result<Vec<String>, StoreError> {
        let bytes = match fs::read(&self.log_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.log_path, err)),
        };
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn rewrite_log(&mut self, lines: &[String]) -> Result<(), StoreError> {
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        write_atomic(&self.log_path, text.as_bytes()).map_err(|err| StoreError::io(&self.log_path, err))
    }

    fn append_log(&mut self, line: &str) -> Result<(), StoreError> {
        ensure_parent(&self.log_path).map_err(|err| StoreError::io(&self.log_path, err))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|err| StoreError::io(&self.log_path, err))?;
        writeln!(file, "{line}").map_err(|err| StoreError::io(&self.log_path, err))
    }

    fn episode(&self) -> Result<EpisodeState, StoreError> {
        match fs::metadata(&self.marker_path) {
            Ok(_) => Ok(EpisodeState::OpenNotified),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(EpisodeState::NoEpisode),
            Err(err) => Err(StoreError::io(&self.marker_path, err)),
        }
    }

    fn set_episode(&mut self, state: EpisodeState) -> Result<(), StoreError> {
        match state {
            EpisodeState::OpenNotified => write_atomic(&self.marker_path, b"")
                .map_err(|err| StoreError::io(&self.marker_path, err)),
            EpisodeState::NoEpisode | EpisodeState::OpenUnnotified => {
                match fs::remove_file(&self.marker_path) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(StoreError::io(&self.marker_path, err)),
                }
            }
        }
    }
}

/// Writes `contents` to a sibling temp file and renames it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    ensure_parent(path)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    use super::*;

    /// In-memory store. The baseline is kept as JSON text so that malformed
    /// content can be injected the same way it appears on disk.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub baseline: Option<String>,
        pub log: Vec<String>,
        pub episode: EpisodeState,
        pub fail_baseline_save: bool,
        pub baseline_saves: usize,
    }

    impl MemoryStore {
        pub fn with_baseline(snapshot: &Snapshot) -> Self {
            Self {
                baseline: Some(snapshot.to_canonical_json().unwrap()),
                ..Self::default()
            }
        }

        pub fn baseline_snapshot(&self) -> Option<Snapshot> {
            self.baseline
                .as_deref()
                .map(|text| serde_json::from_str(text).unwrap())
        }
    }

    impl StateStore for MemoryStore {
        fn load_baseline(&self) -> Result<Option<Snapshot>, StoreError> {
            let Some(text) = &self.baseline else {
                return Ok(None);
            };
            serde_json::from_str(text)
                .map(Some)
                .map_err(|source| StoreError::Parse {
                    path: "<memory>".to_string(),
                    source,
                })
        }

        fn save_baseline(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
            if self.fail_baseline_save {
                return Err(StoreError::Io {
                    path: "<memory>".to_string(),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            self.baseline = Some(snapshot.to_canonical_json()?);
            self.baseline_saves += 1;
            Ok(())
        }

        fn read_log(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.log.clone())
        }

        fn rewrite_log(&mut self, lines: &[String]) -> Result<(), StoreError> {
            self.log = lines.to_vec();
            Ok(())
        }

        fn append_log(&mut self, line: &str) -> Result<(), StoreError> {
            self.log.push(line.to_string());
            Ok(())
        }

        fn episode(&self) -> Result<EpisodeState, StoreError> {
            Ok(match self.episode {
                EpisodeState::OpenNotified => EpisodeState::OpenNotified,
                _ => EpisodeState::NoEpisode,
            })
        }

        fn set_episode(&mut self, state: EpisodeState) -> Result<(), StoreError> {
            self.episode = state;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Component;
    use serde_json::json;

    fn store_in(dir: &Path) -> FileStore {
        FileStore::new(
            dir.join("device_baseline.json"),
            dir.join("device_changes.log"),
            dir.join("alert_sent.flag"),
        )
    }

    #[test]
    fn missing_baseline_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load_baseline().unwrap().is_none());
    }

    #[test]
    fn baseline_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        let snapshot = Snapshot::new()
            .with(Component::Ram, "16.00 GB")
            .with(Component::Gpu, json!(["not available"]));

        store.save_baseline(&snapshot).unwrap();
        assert_eq!(store.load_baseline().unwrap(), Some(snapshot));
        assert!(!dir.path().join("device_baseline.json.tmp").exists());
    }

    #[test]
    fn malformed_baseline_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("device_baseline.json"), "{ not json").unwrap();
        let store = store_in(dir.path());
        assert!(matches!(
            store.load_baseline(),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn non_utf8_baseline_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("device_baseline.json"), [0xff, 0xfe, 0x00, 0x7b]).unwrap();
        let store = store_in(dir.path());
        assert!(matches!(
            store.load_baseline(),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn log_append_and_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        assert!(store.read_log().unwrap().is_empty());

        store.append_log("first").unwrap();
        store.append_log("second").unwrap();
        assert_eq!(store.read_log().unwrap(), vec!["first", "second"]);

        store.rewrite_log(&["second".to_string()]).unwrap();
        store.append_log("third").unwrap();
        assert_eq!(store.read_log().unwrap(), vec!["second", "third"]);
    }

    #[test]
    fn episode_marker_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        assert_eq!(store.episode().unwrap(), EpisodeState::NoEpisode);

        store.set_episode(EpisodeState::OpenNotified).unwrap();
        assert!(dir.path().join("alert_sent.flag").exists());
        assert_eq!(store.episode().unwrap(), EpisodeState::OpenNotified);

        store.set_episode(EpisodeState::NoEpisode).unwrap();
        assert_eq!(store.episode().unwrap(), EpisodeState::NoEpisode);
        store.set_episode(EpisodeState::NoEpisode).unwrap();
    }

    #[test]
    fn write_atomic_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }
}
