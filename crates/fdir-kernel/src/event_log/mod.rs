//! Atomic event log
//!
//! A JSON array of [`OutcomeRecord`]s in a single file, shared by any number
//! of writers. Each mutation is a read-modify-write performed inside one
//! critical section, and the write goes to a temp file that is renamed over
//! the log, so the file is a well-formed sequence after every append even if
//! the process dies half-way.
//!
//! All logs opened on the same path within a process share one lock.

use crate::error::LogError;
use crate::record::OutcomeRecord;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Handle to an outcome log file. Clones share the critical section.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

/// What the sink currently holds
enum Snapshot {
    Missing,
    Records(Vec<OutcomeRecord>),
    Corrupt(serde_json::Error),
}

impl EventLog {
    /// Open (lazily; nothing is created until the first write) the log at `path`
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = path_lock(&path);
        Self {
            path: Arc::new(path),
            lock,
        }
    }

    /// Log file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    ///
    /// Unparseable existing content is treated as an empty log and is
    /// replaced by this write.
    ///
    /// # Errors
    /// [`LogError::Io`] if the file cannot be read or written.
    pub fn append(&self, record: OutcomeRecord) -> Result<(), LogError> {
        self.append_all(std::iter::once(record))
    }

    /// Append several records in one critical section
    ///
    /// # Errors
    /// As [`Self::append`].
    pub fn append_all(
        &self,
        records: impl IntoIterator<Item = OutcomeRecord>,
    ) -> Result<(), LogError> {
        let _guard = self.lock.lock();
        let mut current = match self.load()? {
            Snapshot::Missing => Vec::new(),
            Snapshot::Records(records) => records,
            Snapshot::Corrupt(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt outcome log, starting fresh");
                metrics::counter!("fdir_log_corruption_healed_total").increment(1);
                Vec::new()
            }
        };
        let before = current.len();
        current.extend(records);
        self.store(&current)?;

        let added = current.len() - before;
        tracing::debug!(path = %self.path.display(), added, total = current.len(), "appended outcome records");
        metrics::counter!("fdir_log_records_appended_total").increment(added as u64);
        Ok(())
    }

    /// Every record in the log. A corrupt log reads as empty.
    ///
    /// # Errors
    /// [`LogError::Io`] if the file exists but cannot be read.
    pub fn read_all(&self) -> Result<Vec<OutcomeRecord>, LogError> {
        let _guard = self.lock.lock();
        match self.load()? {
            Snapshot::Missing => Ok(Vec::new()),
            Snapshot::Records(records) => Ok(records),
            Snapshot::Corrupt(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt outcome log read as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Every record in the log, reporting corruption instead of hiding it
    ///
    /// # Errors
    /// [`LogError::Corrupt`] if the content is not a record sequence,
    /// [`LogError::Io`] if the file cannot be read.
    pub fn read_strict(&self) -> Result<Vec<OutcomeRecord>, LogError> {
        let _guard = self.lock.lock();
        match self.load()? {
            Snapshot::Missing => Ok(Vec::new()),
            Snapshot::Records(records) => Ok(records),
            Snapshot::Corrupt(source) => Err(LogError::Corrupt {
                path: self.path.to_path_buf(),
                source,
            }),
        }
    }

    /// Overwrite the log with `records`
    ///
    /// # Errors
    /// [`LogError::Io`] if the file cannot be written.
    pub fn replace_all(&self, records: &[OutcomeRecord]) -> Result<(), LogError> {
        let _guard = self.lock.lock();
        self.store(records)
    }

    /// Remove the given records from the log in one critical section.
    ///
    /// Records are matched on `fault_id` and `timestamp`, so anything appended
    /// since `records` were read stays in the log. The file is deleted when
    /// nothing is left. Returns the number of records removed.
    ///
    /// # Errors
    /// [`LogError::Corrupt`] if the content is not a record sequence,
    /// [`LogError::Io`] if the file cannot be read or written.
    pub fn remove_records(&self, records: &[OutcomeRecord]) -> Result<usize, LogError> {
        let _guard = self.lock.lock();
        let mut current = match self.load()? {
            Snapshot::Missing => return Ok(0),
            Snapshot::Records(current) => current,
            Snapshot::Corrupt(source) => {
                return Err(LogError::Corrupt {
                    path: self.path.to_path_buf(),
                    source,
                })
            }
        };

        let taken: HashSet<_> = records.iter().map(record_key).collect();
        let before = current.len();
        current.retain(|r| !taken.contains(&record_key(r)));
        let removed = before - current.len();

        if current.is_empty() {
            match fs::remove_file(self.path.as_path()) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(LogError::io(self.path.as_path(), e)),
            }
        } else if removed > 0 {
            self.store(&current)?;
        }
        tracing::debug!(path = %self.path.display(), removed, remaining = current.len(), "removed outcome records");
        Ok(removed)
    }

    /// Delete the log file. Returns whether a file was removed.
    ///
    /// # Errors
    /// [`LogError::Io`] for failures other than the file being absent.
    pub fn remove(&self) -> Result<bool, LogError> {
        let _guard = self.lock.lock();
        match fs::remove_file(self.path.as_path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LogError::io(self.path.as_path(), e)),
        }
    }

    fn load(&self) -> Result<Snapshot, LogError> {
        let bytes = match fs::read(self.path.as_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Snapshot::Missing),
            Err(e) => return Err(LogError::io(self.path.as_path(), e)),
        };
        Ok(match serde_json::from_slice::<Vec<OutcomeRecord>>(&bytes) {
            Ok(records) => Snapshot::Records(records),
            Err(e) => Snapshot::Corrupt(e),
        })
    }

    fn store(&self, records: &[OutcomeRecord]) -> Result<(), LogError> {
        let json = serde_json::to_vec_pretty(records).map_err(LogError::Serialize)?;

        // Temp file in the same directory so the rename cannot cross filesystems.
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "outcome_log".into(), |n| n.to_string_lossy().into_owned());
        let tmp_path = parent_dir(&self.path).join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp_path, self.path.as_path())
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            LogError::io(self.path.as_path(), e)
        })
    }
}

fn record_key(record: &OutcomeRecord) -> (String, chrono::DateTime<chrono::Utc>) {
    (record.fault_id.clone(), record.timestamp)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Lock shared by every log opened on the same file in this process.
///
/// Keyed by the canonical parent directory plus file name, so relative
/// spellings and symlinked directories of one file share a lock. Entries are
/// never evicted; the registry holds one entry per distinct log file opened.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .entry(lock_key(path))
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

fn lock_key(path: &Path) -> PathBuf {
    let absolute = std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf());
    match (fs::canonicalize(parent_dir(&absolute)), absolute.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        // parent does not exist yet; no write can succeed until it does
        _ => absolute,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    fn record(fault_id: &str) -> OutcomeRecord {
        OutcomeRecord::new(fault_id, "test", "test_action", Phase::NominalOps, true)
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("absent.json"));
        assert!(log.read_all().unwrap().is_empty());
        assert!(log.read_strict().unwrap().is_empty());
    }

    #[test]
    fn append_creates_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.json");
        let log = EventLog::open(&path);
        log.append(record("f1")).unwrap();

        let data: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data.as_array().unwrap().len(), 1);
        assert_eq!(data[0]["fault_id"], "f1");
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("test.json"));
        for i in 0..5 {
            log.append(record(&format!("f{i}"))).unwrap();
        }
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn same_path_shares_lock() {
        let dir = tempfile::tempdir().unwrap();
        let a = EventLog::open(dir.path().join("shared.json"));
        let b = EventLog::open(dir.path().join("shared.json"));
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
    }

    #[test]
    fn strict_read_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.json");
        fs::write(&path, "invalid json {").unwrap();
        let log = EventLog::open(&path);
        assert!(matches!(log.read_strict(), Err(LogError::Corrupt { .. })));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn equivalent_spellings_share_lock() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let direct = EventLog::open(dir.path().join("log.json"));
        let dotted = EventLog::open(dir.path().join("sub/../log.json"));
        assert!(Arc::ptr_eq(&direct.lock, &dotted.lock));
    }

    #[test]
    fn remove_records_keeps_unlisted_ones() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("test.json"));
        let seen = vec![record("f1"), record("f2")];
        log.append_all(seen.clone()).unwrap();
        log.append(record("late")).unwrap();

        assert_eq!(log.remove_records(&seen).unwrap(), 2);
        let left = log.read_strict().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].fault_id, "late");

        assert_eq!(log.remove_records(&left).unwrap(), 1);
        assert!(!log.path().exists());
        assert_eq!(log.remove_records(&left).unwrap(), 0);
    }

    #[test]
    fn remove_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("test.json"));
        assert!(!log.remove().unwrap());
        log.append(record("f1")).unwrap();
        assert!(log.remove().unwrap());
        assert!(!log.path().exists());
    }
}
