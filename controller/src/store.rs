use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use lamp_common::TimerSchedule;
use thiserror::Error;
use tokio::sync::Mutex;

const SCHEDULE_FILE: &str = "timer.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode schedule: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable copy of the timer schedule, one JSON file in the data directory.
#[derive(Clone)]
pub struct ScheduleStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl ScheduleStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: Arc::new(data_dir.as_ref().join(SCHEDULE_FILE)),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// A missing file is an empty schedule; anything else unreadable is an
    /// error.
    pub async fn load(&self) -> Result<TimerSchedule, StoreError> {
        let _guard = self.lock.lock().await;
        let path: &PathBuf = &self.path;
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(TimerSchedule::default()),
            Err(source) => Err(StoreError::Read {
                path: path.clone(),
                source,
            }),
        }
    }

    /// Replaces the file as a whole: the new content goes to a sibling
    /// temporary file which is then renamed over the old one.
    pub async fn save(&self, schedule: &TimerSchedule) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path: &PathBuf = &self.path;
        let write_error = |source: io::Error| StoreError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let payload = serde_json::to_vec_pretty(schedule)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, payload).await.map_err(write_error)?;
        tokio::fs::rename(&staging, path).await.map_err(write_error)?;
        Ok(())
    }
}
