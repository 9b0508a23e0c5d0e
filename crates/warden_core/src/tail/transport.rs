//! Remote file transports.

use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::RwLock;

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
}

/// Read-only access to the host that writes the logs.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    async fn size(&self, path: &str) -> Result<u64, TransportError>;

    /// Reads up to `len` bytes starting at `offset`. Callers never pass `len == 0`.
    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>, TransportError>;

    /// Whole-file read for hosts without ranged downloads.
    async fn read_all(&self, path: &str) -> Result<Vec<u8>, TransportError>;

    fn supports_partial_reads(&self) -> bool {
        true
    }
}

/// Joins a remote directory and an entry name with `/`.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Serves a mounted or synced log directory. Remote paths are resolved
/// relative to `root`.
#[derive(Debug, Clone)]
pub struct LocalDirTransport {
    root: PathBuf,
}

impl LocalDirTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteTransport for LocalDirTransport {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let mut reader = tokio::fs::read_dir(self.resolve(dir)).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(RemoteEntry {
                path: join_remote(dir, &name),
                name,
                is_dir,
            });
        }
        Ok(entries)
    }

    async fn size(&self, path: &str) -> Result<u64, TransportError> {
        Ok(tokio::fs::metadata(self.resolve(path)).await?.len())
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>, TransportError> {
        let mut file = tokio::fs::File::open(self.resolve(path)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn read_all(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        Ok(tokio::fs::read(self.resolve(path)).await?)
    }
}

/// In-memory file host for tests. Records every ranged read.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    offline: AtomicBool,
    whole_file_only: AtomicBool,
    reads: Mutex<Vec<(String, u64, u64)>>,
    failures: Mutex<HashMap<String, TransportError>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, path: &str, text: &str) {
        self.files
            .write()
            .await
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(text.as_bytes());
    }

    pub async fn replace(&self, path: &str, text: &str) {
        self.files
            .write()
            .await
            .insert(path.to_string(), text.as_bytes().to_vec());
    }

    pub async fn remove(&self, path: &str) {
        self.files.write().await.remove(path);
    }

    /// Every call fails with a timeout while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn set_whole_file_only(&self, whole_file_only: bool) {
        self.whole_file_only.store(whole_file_only, Ordering::Release);
    }

    /// `(path, offset, len)` of every ranged read so far.
    pub fn ranged_reads(&self) -> Vec<(String, u64, u64)> {
        self.reads.lock().map(|reads| reads.clone()).unwrap_or_default()
    }

    /// Makes the next `size` call on `path` fail with `error`.
    pub fn fail_next_size(&self, path: &str, error: TransportError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(path.to_string(), error);
        }
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::Acquire) {
            Err(TransportError::Timeout("memory transport offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        self.check_online()?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir.trim_end_matches('/'))
        };

        let files = self.files.read().await;
        let mut entries: Vec<RemoteEntry> = Vec::new();
        for path in files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let (name, is_dir) = match rest.split_once('/') {
                Some((head, _)) => (head, true),
                None => (rest, false),
            };
            if !entries.iter().any(|entry| entry.name == name) {
                entries.push(RemoteEntry {
                    path: join_remote(dir, name),
                    name: name.to_string(),
                    is_dir,
                });
            }
        }

        if entries.is_empty() && !dir.is_empty() {
            return Err(TransportError::NotFound(dir.to_string()));
        }
        Ok(entries)
    }

    async fn size(&self, path: &str) -> Result<u64, TransportError> {
        self.check_online()?;
        if let Some(error) = self.failures.lock().ok().and_then(|mut f| f.remove(path)) {
            return Err(error);
        }
        self.files
            .read()
            .await
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>, TransportError> {
        self.check_online()?;
        if let Ok(mut reads) = self.reads.lock() {
            reads.push((path.to_string(), offset, len));
        }

        let files = self.files.read().await;
        let data = files
            .get(path)
            .ok_or_else(|| TransportError::NotFound(path.to_string()))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn read_all(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        self.check_online()?;
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    fn supports_partial_reads(&self) -> bool {
        !self.whole_file_only.load(Ordering::Acquire)
    }
}
