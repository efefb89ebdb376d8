//! File-backed session store: JSON records and append-only output logs.
//!
//! Layout, per session id:
//! - `<dir>/<id>.json` - the session record, removed when the record expires
//! - `<dir>/<id>.log`  - full raw output, retained after cleanup
//!
//! Record files exist for external inspection; the session manager's
//! in-memory state is authoritative while the daemon runs.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::warn;

use termcast_core::{SessionError, SessionId, SessionRecord, SessionResult};

/// How far back into a log file `read_log_tail` will look.
const TAIL_WINDOW_BYTES: u64 = 512 * 1024;

/// Handle to the on-disk session store directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Opens (and creates if needed) the store directory.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for a session.
    pub fn record_path(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Path of the output log for a session.
    pub fn log_path(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.log"))
    }

    /// Writes the session record as pretty JSON.
    pub fn persist(&self, record: &SessionRecord) -> SessionResult<()> {
        let json = serde_json::to_vec_pretty(record).map_err(SessionError::io)?;
        fs::write(self.record_path(&record.session_id), json).map_err(SessionError::io)
    }

    /// Removes the record file. Missing files are fine.
    pub fn remove_record(&self, session_id: &SessionId) {
        let path = self.record_path(session_id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove record file");
            }
        }
    }

    /// Creates (truncating any previous incarnation) the session's log file.
    pub fn create_log(&self, session_id: &SessionId) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.log_path(session_id))
    }

    /// Removes the log file. Missing files are fine.
    pub fn remove_log(&self, session_id: &SessionId) {
        let path = self.log_path(session_id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove log file");
            }
        }
    }

    /// Reads the last `max_lines` lines of a session's log.
    ///
    /// Looks at most `TAIL_WINDOW_BYTES` back into the file. Returns
    /// `Ok(None)` when the log file does not exist.
    pub fn read_log_tail(
        &self,
        session_id: &SessionId,
        max_lines: usize,
    ) -> io::Result<Option<Vec<u8>>> {
        let path = self.log_path(session_id);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        let start = len.saturating_sub(TAIL_WINDOW_BYTES);
        file.seek(SeekFrom::Start(start))?;

        let mut data = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut data)?;

        Ok(Some(tail_lines(&data, max_lines).to_vec()))
    }
}

/// Returns the slice holding the last `max_lines` lines of `data`.
///
/// A trailing newline does not count as starting an extra empty line.
fn tail_lines(data: &[u8], max_lines: usize) -> &[u8] {
    if max_lines == 0 || data.is_empty() {
        return &[];
    }

    let mut newlines = 0;
    for (i, byte) in data.iter().enumerate().rev() {
        if *byte != b'\n' {
            continue;
        }
        if i == data.len() - 1 {
            continue;
        }
        newlines += 1;
        if newlines == max_lines {
            return data.get(i + 1..).unwrap_or(data);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Write;

    fn store() -> (tempfile::TempDir, RecordStore) {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let store = RecordStore::new(tmp.path().join("terminals")).expect("create store");
        (tmp, store)
    }

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(
            SessionId::new(id),
            vec!["true".to_string()],
            PathBuf::from("/"),
            Utc::now(),
        )
    }

    #[test]
    fn persist_and_remove_record() {
        let (_tmp, store) = store();
        let rec = record("job-1");

        store.persist(&rec).unwrap();
        let path = store.record_path(&rec.session_id);
        assert!(path.exists());

        let contents = fs::read_to_string(&path).unwrap();
        let parsed: SessionRecord = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, rec);

        store.remove_record(&rec.session_id);
        assert!(!path.exists());

        // Removing again is a no-op, not a panic.
        store.remove_record(&rec.session_id);
    }

    #[test]
    fn create_log_truncates_previous_incarnation() {
        let (_tmp, store) = store();
        let id = SessionId::new("job-2");

        let mut log = store.create_log(&id).unwrap();
        log.write_all(b"old contents\n").unwrap();
        drop(log);

        let log = store.create_log(&id).unwrap();
        drop(log);

        let tail = store.read_log_tail(&id, 100).unwrap().unwrap();
        assert!(tail.is_empty());
    }

    #[test]
    fn read_log_tail_missing_file_is_none() {
        let (_tmp, store) = store();
        let result = store.read_log_tail(&SessionId::new("nope"), 10).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn read_log_tail_returns_last_lines() {
        let (_tmp, store) = store();
        let id = SessionId::new("job-3");

        let mut log = store.create_log(&id).unwrap();
        for i in 0..10 {
            writeln!(log, "line-{i}").unwrap();
        }
        drop(log);

        let tail = store.read_log_tail(&id, 3).unwrap().unwrap();
        assert_eq!(tail, b"line-7\nline-8\nline-9\n");

        // Asking for more lines than exist returns everything.
        let all = store.read_log_tail(&id, 100).unwrap().unwrap();
        assert!(all.starts_with(b"line-0\n"));
    }

    #[test]
    fn tail_lines_edge_cases() {
        assert_eq!(tail_lines(b"", 5), b"");
        assert_eq!(tail_lines(b"abc", 0), b"");
        assert_eq!(tail_lines(b"no newline", 1), b"no newline");
        assert_eq!(tail_lines(b"a\nb\nc\n", 1), b"c\n");
        assert_eq!(tail_lines(b"a\nb\nc", 2), b"b\nc");
        assert_eq!(tail_lines(b"a\nb\nc\n", 10), b"a\nb\nc\n");
    }
}
