//! Append-only log file store.
//!
//! Every [`Batch`] is encoded as one record:
//!
//! ```text
//! [len: u32 LE][checksum: 4 bytes][payload: bincode Vec<BatchOp>]
//! ```
//!
//! The checksum is the first four bytes of the keccak hash of the payload.
//! On open the log is replayed through a read-only memory map into an
//! ordered in-memory index; the first record that is cut short or fails
//! its checksum ends the replay and everything from there on is truncated.
//! A batch interrupted by a crash is therefore either fully visible or
//! absent.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{Batch, BatchOp, KeyValueStore, StoreMetrics};
use crate::merkle::keccak256;

const HEADER_SIZE: usize = 8;

/// When written records are forced to stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Sync data and file metadata after every batch (slowest, fully durable).
    FlushDataAndMetadata,
    /// Sync file data after every batch.
    #[default]
    FlushData,
    /// Leave flushing to the OS (fastest, not durable across power loss).
    DangerNoFlush,
}

struct LogFile {
    file: File,
    len: u64,
}

/// A key-value store persisted as a log of batch records.
pub struct FileDb {
    path: PathBuf,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    log: Mutex<LogFile>,
    sync: SyncMode,
    metrics: StoreMetrics,
}

impl FileDb {
    /// Opens or creates the store at `path` with the default sync mode.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with(path, SyncMode::default())
    }

    /// Opens or creates the store at `path`.
    pub fn open_with(path: impl AsRef<Path>, sync: SyncMode) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let mut data = BTreeMap::new();
        let valid = if file_len > 0 {
            // SAFETY: the file is opened by this process only and is not
            // modified while the map is alive.
            let mmap = unsafe { Mmap::map(&file)? };
            replay(&mmap, &mut data)
        } else {
            0
        };

        if valid < file_len {
            warn!(
                path = %path.display(),
                valid,
                file_len,
                "discarding torn records at the end of the store log"
            );
            file.set_len(valid)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;
        debug!(path = %path.display(), keys = data.len(), "opened file store");

        Ok(Self {
            path,
            data: RwLock::new(data),
            log: Mutex::new(LogFile { file, len: valid }),
            sync,
            metrics: StoreMetrics::new(),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log file in bytes.
    pub fn file_size(&self) -> u64 {
        self.log.lock().len
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns the store's metrics.
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// Rewrites the log as a single record holding only live keys.
    pub fn compact(&self) -> io::Result<()> {
        let mut log = self.log.lock();
        let data = self.data.read();

        let ops: Vec<BatchOp> = data
            .iter()
            .map(|(key, value)| BatchOp::Put {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        let record = encode_record(&ops)?;

        let tmp = self.path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(&record)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        let before = log.len;
        *log = LogFile {
            file,
            len: record.len() as u64,
        };
        info!(before, after = log.len, keys = data.len(), "compacted store log");
        Ok(())
    }

    fn append(&self, log: &mut LogFile, record: &[u8]) -> io::Result<()> {
        if let Err(err) = log.file.write_all(record) {
            // Cut off the partial record so later appends stay readable.
            log.file.set_len(log.len)?;
            log.file.seek(SeekFrom::End(0))?;
            return Err(err);
        }
        match self.sync {
            SyncMode::FlushDataAndMetadata => log.file.sync_all()?,
            SyncMode::FlushData => log.file.sync_data()?,
            SyncMode::DangerNoFlush => {}
        }
        log.len += record.len() as u64;
        Ok(())
    }
}

impl KeyValueStore for FileDb {
    fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let value = self.data.read().get(key).cloned();
        self.metrics.record_read(value.as_ref().map(Vec::len));
        Ok(value)
    }

    fn write_batch(&self, batch: Batch) -> io::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let bytes = batch.value_size() as u64;
        let ops = batch.into_ops();
        let record = encode_record(&ops)?;

        let mut log = self.log.lock();
        self.append(&mut log, &record)?;

        let (writes, deletes) = apply(&mut self.data.write(), ops);
        drop(log);

        self.metrics.record_batch(writes, deletes, bytes);
        Ok(())
    }
}

impl std::fmt::Debug for FileDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDb")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

fn encode_record(ops: &[BatchOp]) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(ops).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "batch too large"))?;

    let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(&keccak256(&payload)[..4]);
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Replays records from `buf` into `data`, returning the length of the
/// valid prefix.
fn replay(buf: &[u8], data: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> u64 {
    let mut offset = 0usize;
    while buf.len() - offset >= HEADER_SIZE {
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[offset..offset + 4]);
        let start = offset + HEADER_SIZE;
        let end = start + u32::from_le_bytes(len) as usize;
        if end > buf.len() {
            break;
        }

        let payload = &buf[start..end];
        if keccak256(payload)[..4] != buf[offset + 4..start] {
            break;
        }
        let ops: Vec<BatchOp> = match bincode::deserialize(payload) {
            Ok(ops) => ops,
            Err(_) => break,
        };
        apply(data, ops);
        offset = end;
    }
    offset as u64
}

fn apply(data: &mut BTreeMap<Vec<u8>, Vec<u8>>, ops: Vec<BatchOp>) -> (u64, u64) {
    let (mut writes, mut deletes) = (0, 0);
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                data.insert(key, value);
                writes += 1;
            }
            BatchOp::Delete { key } => {
                data.remove(&key);
                deletes += 1;
            }
        }
    }
    (writes, deletes)
}
