use redb::{Database, ReadableTable, TableDefinition};
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::url_utils::UrlHash;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database creation error: {0}")]
    RedbCreate(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Durable frontier entry: one per normalized URL for the lifetime of the store.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[archive(check_bytes)]
pub struct UrlRecord {
    pub url: String,
    pub completed: bool,
    pub discovered_at: u64,
    pub completed_at: Option<u64>,
}

impl UrlRecord {
    pub fn new(url: String) -> Self {
        Self {
            url,
            completed: false,
            discovered_at: unix_now(),
            completed_at: None,
        }
    }

    /// Flip to completed. Never reverts.
    pub fn mark_completed(&mut self) {
        if !self.completed {
            self.completed = true;
            self.completed_at = Some(unix_now());
        }
    }
}

/// Outcome of `CrawlerState::mark_completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed,
    AlreadyCompleted,
    /// No record under this hash
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub total: usize,
    pub completed: usize,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// DATABASE SCHEMA
// ============================================================================

// hash(normalized url) -> rkyv(UrlRecord)
const URLS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("urls");

/// Durable hash -> record store backed by redb.
///
/// Every mutation is its own committed write transaction, so it is on disk
/// before the call returns.
pub struct CrawlerState {
    db: Database,
    path: PathBuf,
}

impl CrawlerState {
    /// Open the store at `path`, creating it (and parent directories) if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;

        // Open the table once so later read transactions always find it.
        let write_txn = db.begin_write()?;
        {
            let _urls = write_txn.open_table(URLS)?;
        }
        write_txn.commit()?;

        Ok(Self { db, path })
    }

    /// Delete the whole store. Returns whether a file was removed.
    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<bool, StateError> {
        match std::fs::remove_file(path.as_ref()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, hash: &UrlHash) -> Result<bool, StateError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(URLS)?;
        Ok(table.get(hash.as_bytes().as_slice())?.is_some())
    }

    pub fn get(&self, hash: &UrlHash) -> Result<Option<UrlRecord>, StateError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(URLS)?;
        match table.get(hash.as_bytes().as_slice())? {
            Some(bytes) => Ok(Some(decode_record(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Insert a record unless the hash is already present.
    /// Returns true if inserted, false if it already existed.
    pub fn insert_if_absent(&self, hash: &UrlHash, record: &UrlRecord) -> Result<bool, StateError> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(URLS)?;
            if table.get(hash.as_bytes().as_slice())?.is_some() {
                false
            } else {
                let serialized = encode_record(record)?;
                table.insert(hash.as_bytes().as_slice(), serialized.as_slice())?;
                true
            }
        };

        if inserted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(inserted)
    }

    /// Set `completed = true` on an existing record.
    pub fn mark_completed(&self, hash: &UrlHash) -> Result<CompletionOutcome, StateError> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(URLS)?;

            // Copy out before reusing the table mutably.
            let existing = table
                .get(hash.as_bytes().as_slice())?
                .map(|bytes| bytes.value().to_vec());

            match existing {
                None => CompletionOutcome::Missing,
                Some(bytes) => {
                    let mut record = decode_record(&bytes)?;
                    if record.completed {
                        CompletionOutcome::AlreadyCompleted
                    } else {
                        record.mark_completed();
                        let serialized = encode_record(&record)?;
                        table.insert(hash.as_bytes().as_slice(), serialized.as_slice())?;
                        CompletionOutcome::Completed
                    }
                }
            }
        };

        if outcome == CompletionOutcome::Completed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(outcome)
    }

    /// Visit every record (full scan, used for resume and export).
    pub fn for_each_record<F>(&self, mut f: F) -> Result<(), StateError>
    where
        F: FnMut(UrlRecord) -> Result<(), StateError>,
    {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(URLS)?;

        for result in table.iter()? {
            let (_key, value) = result?;
            f(decode_record(value.value())?)?;
        }

        Ok(())
    }

    /// Get all records.
    /// WARNING: This loads everything into memory. Use for_each_record() for large stores.
    pub fn get_all_records(&self) -> Result<Vec<UrlRecord>, StateError> {
        let mut records = Vec::new();
        self.for_each_record(|record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }

    /// Write one JSON object per record. Returns the number of lines written.
    pub fn export_to_jsonl<P: AsRef<Path>>(
        &self,
        output_path: P,
        pending_only: bool,
    ) -> Result<usize, StateError> {
        use std::fs::OpenOptions;
        use std::io::{BufWriter, Write};

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(output_path)?;
        let mut writer = BufWriter::new(file);

        let mut written = 0;
        self.for_each_record(|record| {
            if pending_only && record.completed {
                return Ok(());
            }
            let json = serde_json::to_string(&record)
                .map_err(|e| StateError::Serialization(e.to_string()))?;
            writeln!(writer, "{}", json)?;
            written += 1;
            Ok(())
        })?;
        writer.flush()?;

        Ok(written)
    }

    // TODO: keep running totals in a metadata table instead of scanning
    pub fn counts(&self) -> Result<RecordCounts, StateError> {
        let mut counts = RecordCounts::default();
        self.for_each_record(|record| {
            counts.total += 1;
            if record.completed {
                counts.completed += 1;
            }
            Ok(())
        })?;
        Ok(counts)
    }
}

fn encode_record(record: &UrlRecord) -> Result<AlignedVec, StateError> {
    rkyv::to_bytes::<_, 256>(record)
        .map_err(|e| StateError::Serialization(format!("Serialize failed: {}", e)))
}

fn decode_record(bytes: &[u8]) -> Result<UrlRecord, StateError> {
    // redb hands out unaligned slices; rkyv needs aligned input.
    let mut aligned = AlignedVec::new();
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<UrlRecord>(&aligned)
        .map_err(|e| StateError::Serialization(format!("Deserialize failed: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(url: &str) -> (UrlHash, UrlRecord) {
        (UrlHash::of(url), UrlRecord::new(url.to_string()))
    }

    #[test]
    fn test_state_creation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("frontier.redb");
        let state = CrawlerState::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(state.path(), path.as_path());
        assert_eq!(state.counts().unwrap(), RecordCounts::default());
    }

    #[test]
    fn test_insert_if_absent_deduplicates() {
        let dir = TempDir::new().unwrap();
        let state = CrawlerState::open(dir.path().join("f.redb")).unwrap();
        let (hash, rec) = record("https://a.ics.uci.edu/");

        assert!(state.insert_if_absent(&hash, &rec).unwrap());
        assert!(!state.insert_if_absent(&hash, &rec).unwrap());
        assert!(state.contains(&hash).unwrap());
        assert_eq!(state.counts().unwrap().total, 1);
    }

    #[test]
    fn test_mark_completed_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let state = CrawlerState::open(dir.path().join("f.redb")).unwrap();
        let (hash, rec) = record("https://a.ics.uci.edu/");
        state.insert_if_absent(&hash, &rec).unwrap();

        assert_eq!(state.mark_completed(&hash).unwrap(), CompletionOutcome::Completed);
        assert_eq!(
            state.mark_completed(&hash).unwrap(),
            CompletionOutcome::AlreadyCompleted
        );

        let stored = state.get(&hash).unwrap().unwrap();
        assert!(stored.completed);
        assert!(stored.completed_at.is_some());

        // Re-inserting a completed URL must not reset it
        assert!(!state.insert_if_absent(&hash, &rec).unwrap());
        assert!(state.get(&hash).unwrap().unwrap().completed);
    }

    #[test]
    fn test_mark_completed_missing() {
        let dir = TempDir::new().unwrap();
        let state = CrawlerState::open(dir.path().join("f.redb")).unwrap();
        let hash = UrlHash::of("https://never.ics.uci.edu/");
        assert_eq!(state.mark_completed(&hash).unwrap(), CompletionOutcome::Missing);
        assert!(!state.contains(&hash).unwrap());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.redb");
        let (h1, r1) = record("https://a.ics.uci.edu/");
        let (h2, r2) = record("https://b.ics.uci.edu/");

        {
            let state = CrawlerState::open(&path).unwrap();
            state.insert_if_absent(&h1, &r1).unwrap();
            state.insert_if_absent(&h2, &r2).unwrap();
            state.mark_completed(&h1).unwrap();
        }

        let state = CrawlerState::open(&path).unwrap();
        let counts = state.counts().unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.completed, 1);

        let mut urls: Vec<String> = state
            .get_all_records()
            .unwrap()
            .into_iter()
            .map(|r| r.url)
            .collect();
        urls.sort();
        assert_eq!(urls, vec!["https://a.ics.uci.edu/", "https://b.ics.uci.edu/"]);
    }

    #[test]
    fn test_export_to_jsonl() {
        let dir = TempDir::new().unwrap();
        let state = CrawlerState::open(dir.path().join("f.redb")).unwrap();
        let (h1, r1) = record("https://a.ics.uci.edu/");
        let (h2, r2) = record("https://b.ics.uci.edu/");
        state.insert_if_absent(&h1, &r1).unwrap();
        state.insert_if_absent(&h2, &r2).unwrap();
        state.mark_completed(&h1).unwrap();

        let out = dir.path().join("urls.jsonl");
        assert_eq!(state.export_to_jsonl(&out, false).unwrap(), 2);

        let lines: Vec<UrlRecord> = std::fs::read_to_string(&out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|r| r.url == "https://a.ics.uci.edu/" && r.completed));

        assert_eq!(state.export_to_jsonl(&out, true).unwrap(), 1);
        let pending = std::fs::read_to_string(&out).unwrap();
        assert!(pending.contains("https://b.ics.uci.edu/"));
        assert!(!pending.contains("https://a.ics.uci.edu/"));
    }

    #[test]
    fn test_destroy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.redb");
        {
            let _state = CrawlerState::open(&path).unwrap();
        }
        assert!(CrawlerState::destroy(&path).unwrap());
        assert!(!path.exists());
        assert!(!CrawlerState::destroy(&path).unwrap());
    }
}
