//! Durable change store backed by an append-only journal.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # Advisory lock for single-process access
//! └─ journal.log   # One JSON journal entry per line
//! ```
//!
//! Every commit appends one line holding both the item and the counter it
//! consumed, so a crash can never persist one without the other. Opening the
//! store replays the journal into memory. A torn final line (crash during an
//! append) is cut off; damage anywhere else is reported as corruption.
//!
//! A failed append is cut back off the journal before the error is returned,
//! so the journal never holds a counter the in-memory tables have not seen.
//! If the cut itself fails the store refuses further writes.

use super::memory::Tables;
use super::ChangeStore;
use crate::error::{CoreError, CoreResult};
use crate::item::{ChangeItem, ChangeLogState, ChangeWrite};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const JOURNAL_TEMP: &str = "journal.log.tmp";

/// Options for [`FileChangeStore`].
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Create the directory if it does not exist.
    pub create_if_missing: bool,
    /// `fsync` the journal after every commit.
    pub sync_writes: bool,
}

impl FileStoreOptions {
    /// Sets whether commits are synced to disk.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Sets whether a missing directory is created.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_writes: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Commit {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counter: Option<u64>,
        item: ChangeItem,
    },
    Fingerprint {
        collection: String,
        fingerprint: String,
    },
    /// Written by compaction ahead of a collection's items.
    State {
        collection: String,
        state: ChangeLogState,
    },
}

impl JournalEntry {
    fn check(&self, tables: &mut Tables) -> CoreResult<()> {
        match self {
            JournalEntry::Commit {
                collection,
                counter: Some(counter),
                ..
            } => tables
                .table_mut(collection)
                .check(collection, Some(*counter)),
            _ => Ok(()),
        }
    }

    fn apply(self, tables: &mut Tables) {
        match self {
            JournalEntry::Commit {
                collection,
                counter,
                item,
            } => tables.table_mut(&collection).apply(ChangeWrite {
                sequence_counter: counter,
                item,
            }),
            JournalEntry::Fingerprint {
                collection,
                fingerprint,
            } => tables.table_mut(&collection).state.config_fingerprint = Some(fingerprint),
            JournalEntry::State { collection, state } => {
                tables.table_mut(&collection).state = state;
            }
        }
    }

    fn to_line(&self) -> CoreResult<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// A change store persisted to a journal file.
///
/// # Thread Safety
///
/// The store holds an exclusive lock on its directory; a second open from any
/// process fails with [`CoreError::StoreLocked`]. Within the process it can be
/// shared freely.
///
/// # Example
///
/// ```no_run
/// use syncfeed_core::{ChangeStore, FileChangeStore, FileStoreOptions};
/// use std::path::Path;
///
/// let store = FileChangeStore::open(Path::new("feed_data"), FileStoreOptions::default()).unwrap();
/// println!("collections: {:?}", store.collections().unwrap());
/// ```
#[derive(Debug)]
pub struct FileChangeStore {
    path: PathBuf,
    options: FileStoreOptions,
    tables: RwLock<Tables>,
    journal: Mutex<File>,
    poisoned: AtomicBool,
    _lock_file: File,
}

impl FileChangeStore {
    /// Opens or creates a store directory and replays its journal.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (`StoreLocked`)
    /// - The journal is corrupt before its last line
    pub fn open(path: &Path, options: FileStoreOptions) -> CoreResult<Self> {
        if !path.exists() {
            if options.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("store directory does not exist: {}", path.display()),
                )));
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        let journal_path = path.join(JOURNAL_FILE);
        let tables = Self::replay(&journal_path)?;

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;

        info!(
            path = %path.display(),
            collections = tables.collections.len(),
            "opened change store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            options,
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
            poisoned: AtomicBool::new(false),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(journal_path: &Path) -> CoreResult<Tables> {
        let mut tables = Tables::default();
        if !journal_path.exists() {
            return Ok(tables);
        }

        let mut data = Vec::new();
        File::open(journal_path)?.read_to_end(&mut data)?;

        let mut offset = 0usize;
        let mut line_no = 0usize;
        let mut keep_len = 0usize;
        let mut needs_newline = false;

        while offset < data.len() {
            line_no += 1;
            let end = data[offset..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|p| offset + p);
            let (line, next, terminated) = match end {
                Some(end) => (&data[offset..end], end + 1, true),
                None => (&data[offset..], data.len(), false),
            };

            if line.iter().all(u8::is_ascii_whitespace) {
                offset = next;
                keep_len = next;
                continue;
            }

            match serde_json::from_slice::<JournalEntry>(line) {
                Ok(entry) => {
                    if let Err(e) = entry.check(&mut tables) {
                        return Err(CoreError::CorruptJournal {
                            line: line_no,
                            message: e.to_string(),
                        });
                    }
                    entry.apply(&mut tables);
                    keep_len = next;
                    needs_newline = !terminated;
                }
                Err(e) if !terminated => {
                    warn!(line = line_no, error = %e, "discarding torn journal tail");
                }
                Err(e) => {
                    return Err(CoreError::CorruptJournal {
                        line: line_no,
                        message: e.to_string(),
                    });
                }
            }
            offset = next;
        }

        if keep_len < data.len() {
            let file = OpenOptions::new().write(true).open(journal_path)?;
            file.set_len(keep_len as u64)?;
            file.sync_all()?;
        }
        if needs_newline {
            let mut file = OpenOptions::new().append(true).open(journal_path)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }

        debug!(lines = line_no, "replayed journal");
        Ok(tables)
    }

    fn append(&self, journal: &mut File, entry: &JournalEntry) -> CoreResult<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(CoreError::JournalPoisoned);
        }
        let line = entry.to_line()?;
        match append_line(journal, &line, self.options.sync_writes) {
            Ok(()) => Ok(()),
            Err(AppendFailure {
                error: e,
                rolled_back: true,
            }) => Err(e.into()),
            Err(AppendFailure { error: e, .. }) => {
                self.poisoned.store(true, Ordering::SeqCst);
                error!(path = %self.path.display(), error = %e, "journal append could not be rolled back");
                Err(CoreError::JournalPoisoned)
            }
        }
    }

    /// Rewrites the journal so it holds one entry per live row.
    ///
    /// Uses write-then-rename: the new journal is written to a temp file,
    /// synced, renamed over the old one, and the directory is synced.
    pub fn compact(&self) -> CoreResult<()> {
        let mut journal = self.journal.lock();
        let tables = self.tables.read();

        let temp_path = self.path.join(JOURNAL_TEMP);
        let mut temp = File::create(&temp_path)?;
        let mut entries = 0usize;

        for name in tables.names() {
            let Some(table) = tables.collections.get(&name) else {
                continue;
            };
            let state = JournalEntry::State {
                collection: name.clone(),
                state: table.state.clone(),
            };
            temp.write_all(&state.to_line()?)?;
            entries += 1;

            for item in table.items.values() {
                let entry = JournalEntry::Commit {
                    collection: name.clone(),
                    counter: None,
                    item: item.clone(),
                };
                temp.write_all(&entry.to_line()?)?;
                entries += 1;
            }
        }
        temp.sync_all()?;
        drop(temp);

        let journal_path = self.path.join(JOURNAL_FILE);
        fs::rename(&temp_path, &journal_path)?;
        self.sync_directory()?;

        *journal = OpenOptions::new().append(true).open(&journal_path)?;
        info!(path = %self.path.display(), entries, "compacted change journal");
        Ok(())
    }

    /// Returns the size of the journal in bytes.
    pub fn journal_len(&self) -> CoreResult<u64> {
        Ok(self.journal.lock().metadata()?.len())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Append target of the journal.
trait JournalWrite: Write {
    fn end(&self) -> io::Result<u64>;
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl JournalWrite for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

#[derive(Debug)]
struct AppendFailure {
    error: io::Error,
    /// The journal is back at its length before the append.
    rolled_back: bool,
}

/// Appends one line. On failure the journal is cut back to where it was.
fn append_line<J: JournalWrite>(
    journal: &mut J,
    line: &[u8],
    sync: bool,
) -> Result<(), AppendFailure> {
    let start = journal.end().map_err(|error| AppendFailure {
        error,
        rolled_back: true,
    })?;
    let written = journal
        .write_all(line)
        .and_then(|()| if sync { journal.sync() } else { Ok(()) });
    let Err(error) = written else {
        return Ok(());
    };

    let rolled_back = match journal.truncate(start) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to cut back journal");
            false
        }
    };
    Err(AppendFailure { error, rolled_back })
}

impl ChangeStore for FileChangeStore {
    fn log_state(&self, collection: &str) -> CoreResult<ChangeLogState> {
        Ok(self.tables.read().log_state(collection))
    }

    fn get(&self, collection: &str, key: &str) -> CoreResult<Option<ChangeItem>> {
        Ok(self.tables.read().get(collection, key))
    }

    fn commit(&self, collection: &str, write: ChangeWrite) -> CoreResult<()> {
        let mut journal = self.journal.lock();
        self.tables
            .read()
            .collections
            .get(collection)
            .map_or(Ok(()), |table| table.check(collection, write.sequence_counter))?;
        let entry = JournalEntry::Commit {
            collection: collection.to_string(),
            counter: write.sequence_counter,
            item: write.item,
        };
        self.append(&mut journal, &entry)?;
        entry.apply(&mut self.tables.write());
        Ok(())
    }

    fn since(&self, collection: &str, since: u64, limit: usize) -> CoreResult<Vec<ChangeItem>> {
        Ok(self.tables.read().since(collection, since, limit))
    }

    fn page_by_key(
        &self,
        collection: &str,
        after: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<ChangeItem>> {
        Ok(self.tables.read().page_by_key(collection, after, limit))
    }

    fn set_fingerprint(&self, collection: &str, fingerprint: &str) -> CoreResult<()> {
        let mut journal = self.journal.lock();
        let entry = JournalEntry::Fingerprint {
            collection: collection.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        self.append(&mut journal, &entry)?;
        entry.apply(&mut self.tables.write());
        Ok(())
    }

    fn collections(&self) -> CoreResult<Vec<String>> {
        Ok(self.tables.read().names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(key: &str, sequence: u64) -> ChangeItem {
        let mut item = ChangeItem::live(key, b"{\"v\":1}".to_vec());
        item.sequence = sequence;
        item
    }

    fn options() -> FileStoreOptions {
        FileStoreOptions::default().with_sync_writes(false)
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileChangeStore::open(dir.path(), options()).unwrap();
            store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();
            store.commit("c", ChangeWrite::sequenced(item("B", 2))).unwrap();
            store.set_fingerprint("c", "fp-1").unwrap();
        }

        let store = FileChangeStore::open(dir.path(), options()).unwrap();
        let state = store.log_state("c").unwrap();
        assert_eq!(state.sequence_counter, 2);
        assert_eq!(state.config_fingerprint.as_deref(), Some("fp-1"));
        assert_eq!(store.since("c", 0, 10).unwrap().len(), 2);
    }

    #[test]
    fn lock_prevents_second_open() {
        let dir = tempdir().unwrap();
        let _store = FileChangeStore::open(dir.path(), options()).unwrap();
        let result = FileChangeStore::open(dir.path(), options());
        assert!(matches!(result, Err(CoreError::StoreLocked)));
    }

    #[test]
    fn missing_dir_without_create_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent");
        let result = FileChangeStore::open(&path, options().with_create_if_missing(false));
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        {
            let store = FileChangeStore::open(dir.path(), options()).unwrap();
            store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();
        }

        let journal = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
        file.write_all(b"{\"op\":\"commit\",\"collection\":\"c\",\"ite").unwrap();
        drop(file);

        let store = FileChangeStore::open(dir.path(), options()).unwrap();
        assert_eq!(store.log_state("c").unwrap().sequence_counter, 1);
        store.commit("c", ChangeWrite::sequenced(item("B", 2))).unwrap();
        drop(store);

        let store = FileChangeStore::open(dir.path(), options()).unwrap();
        assert_eq!(store.since("c", 0, 10).unwrap().len(), 2);
    }

    #[test]
    fn corruption_before_tail_is_an_error() {
        let dir = tempdir().unwrap();
        {
            let store = FileChangeStore::open(dir.path(), options()).unwrap();
            store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();
        }

        let journal = dir.path().join(JOURNAL_FILE);
        let mut data = fs::read(&journal).unwrap();
        let mut corrupted = b"not json\n".to_vec();
        corrupted.append(&mut data);
        fs::write(&journal, corrupted).unwrap();

        let result = FileChangeStore::open(dir.path(), options());
        assert!(matches!(
            result,
            Err(CoreError::CorruptJournal { line: 1, .. })
        ));
    }

    #[test]
    fn reused_counter_in_journal_is_corruption() {
        let dir = tempdir().unwrap();
        {
            let store = FileChangeStore::open(dir.path(), options()).unwrap();
            store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();

            // A line that reached the journal but never the tables.
            let stranded = JournalEntry::Commit {
                collection: "c".into(),
                counter: Some(2),
                item: item("B", 2),
            };
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(JOURNAL_FILE))
                .unwrap();
            file.write_all(&stranded.to_line().unwrap()).unwrap();
            drop(file);

            store.commit("c", ChangeWrite::sequenced(item("C", 2))).unwrap();
        }

        let result = FileChangeStore::open(dir.path(), options());
        assert!(matches!(
            result,
            Err(CoreError::CorruptJournal { line: 3, .. })
        ));
    }

    #[test]
    fn stale_commit_never_reaches_journal() {
        let dir = tempdir().unwrap();
        let store = FileChangeStore::open(dir.path(), options()).unwrap();
        store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();
        let len = store.journal_len().unwrap();

        let err = store
            .commit("c", ChangeWrite::sequenced(item("B", 1)))
            .unwrap_err();
        assert!(matches!(err, CoreError::StaleSequence { .. }));
        assert_eq!(store.journal_len().unwrap(), len);
    }

    /// In-memory journal whose sync or truncate can be made to fail.
    #[derive(Default)]
    struct FlakyJournal {
        data: Vec<u8>,
        fail_sync: bool,
        fail_truncate: bool,
    }

    impl Write for FlakyJournal {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl JournalWrite for FlakyJournal {
        fn end(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::other("disk gone"));
            }
            Ok(())
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(io::Error::other("still gone"));
            }
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_sync_cuts_the_line_back() {
        let mut journal = FlakyJournal::default();
        append_line(&mut journal, b"first\n", true).unwrap();

        journal.fail_sync = true;
        let failure = append_line(&mut journal, b"second\n", true).unwrap_err();
        assert!(failure.rolled_back);
        assert_eq!(failure.error.to_string(), "disk gone");
        assert_eq!(journal.data, b"first\n");

        // Without syncing the same write goes through.
        append_line(&mut journal, b"second\n", false).unwrap();
        assert_eq!(journal.data, b"first\nsecond\n");
    }

    #[test]
    fn failed_cut_back_is_reported() {
        let mut journal = FlakyJournal {
            fail_sync: true,
            fail_truncate: true,
            ..Default::default()
        };
        let failure = append_line(&mut journal, b"line\n", true).unwrap_err();
        assert!(!failure.rolled_back);
    }

    #[test]
    fn compact_preserves_state() {
        let dir = tempdir().unwrap();
        {
            let store = FileChangeStore::open(dir.path(), options()).unwrap();
            for seq in 1..=20 {
                store
                    .commit("c", ChangeWrite::sequenced(item("A", seq)))
                    .unwrap();
            }
            store.set_fingerprint("c", "fp").unwrap();
            let before = store.journal_len().unwrap();
            store.compact().unwrap();
            assert!(store.journal_len().unwrap() < before);
            store.commit("c", ChangeWrite::sequenced(item("B", 21))).unwrap();
        }

        let journal = fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
        assert_eq!(journal.lines().count(), 3);

        let store = FileChangeStore::open(dir.path(), options()).unwrap();
        let state = store.log_state("c").unwrap();
        assert_eq!(state.sequence_counter, 21);
        assert_eq!(state.config_fingerprint.as_deref(), Some("fp"));
        let items = store.since("c", 0, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].sequence, 20);
    }
}
