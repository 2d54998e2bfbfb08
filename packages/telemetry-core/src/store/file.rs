//! Durable history as a JSON-lines log.
//!
//! Each append writes one line and flushes before returning. On open the log
//! is replayed into the in-memory index; unreadable lines (e.g. a line torn by
//! a crash) are skipped with a warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::index::RecordIndex;
use super::{StoreError, StoredRecord, TelemetryStore, TimeRange};
use crate::protocol_constants::TELEMETRY_LOG_FILE;
use crate::record::NormalizedRecord;

struct LogWriter {
    file: File,
    /// The log may end without a newline (torn line or failed write).
    needs_newline: bool,
}

pub struct FileStore {
    path: PathBuf,
    index: RwLock<RecordIndex>,
    writer: Mutex<LogWriter>,
}

impl FileStore {
    /// Opens (or creates) the log in `dir` and replays it.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(TELEMETRY_LOG_FILE);

        let mut index = RecordIndex::default();
        let mut needs_newline = false;
        match tokio::fs::read(&path).await {
            Ok(contents) => {
                needs_newline = contents.last().is_some_and(|b| *b != b'\n');
                let mut skipped = 0usize;
                for (n, line) in contents.split(|b| *b == b'\n').enumerate() {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<StoredRecord>(line) {
                        Ok(stored) => index.insert(stored),
                        Err(e) => {
                            skipped += 1;
                            log::warn!(
                                "[Store] Skipping unreadable line {} of {}: {}",
                                n + 1,
                                path.display(),
                                e
                            );
                        }
                    }
                }
                if skipped > 0 {
                    log::warn!("[Store] {} line(s) skipped during replay", skipped);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        log::info!(
            "[Store] Opened {} ({} record(s))",
            path.display(),
            index.len()
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(LogWriter {
                file,
                needs_newline,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TelemetryStore for FileStore {
    async fn append(&self, record: Arc<NormalizedRecord>) -> Result<StoredRecord, StoreError> {
        // Holding the writer lock keeps key order equal to log order.
        let mut writer = self.writer.lock().await;
        let stored = self.index.write().assign(record);

        let mut line = Vec::with_capacity(512);
        if writer.needs_newline {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, &stored)?;
        line.push(b'\n');

        let written = async {
            writer.file.write_all(&line).await?;
            writer.file.flush().await
        }
        .await;
        if let Err(e) = written {
            writer.needs_newline = true;
            return Err(e.into());
        }
        writer.needs_newline = false;

        self.index.write().insert(stored.clone());
        Ok(stored)
    }

    async fn query(
        &self,
        identifier: &str,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.index.read().query(identifier, range, limit))
    }

    async fn scan(&self, range: TimeRange, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.index.read().scan(range, limit))
    }

    async fn len(&self) -> usize {
        self.index.read().len()
    }
}
