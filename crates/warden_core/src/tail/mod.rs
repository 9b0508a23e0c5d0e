//! Incremental tailing of the remote administration log.
//!
//! [`Tailer::poll`] returns the complete lines appended since the committed
//! cursor together with the cursor that would follow them. Nothing is
//! persisted until [`Tailer::commit`] is called, so a crash between the two
//! re-delivers the batch.

pub mod ftp;
pub mod transport;

pub use ftp::{FtpConfig, FtpTransport};
pub use transport::{join_remote, LocalDirTransport, MemoryTransport, RemoteEntry, RemoteTransport};

use crate::config::TailSettings;
use crate::error::{StoreError, TransportError, WardenError};
use crate::events::LogLine;
use crate::store::{CursorStore, LogCursor};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TailError> for WardenError {
    fn from(err: TailError) -> Self {
        match err {
            TailError::Transport(err) => WardenError::Transport(err),
            TailError::Store(err) => WardenError::Store(err),
        }
    }
}

/// Lines fetched in one cycle and the cursor just past them.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub lines: Vec<LogLine>,
    pub cursor: LogCursor,
    /// The tracked file changed during this poll
    pub rotated: bool,
}

/// Orders eligible log names: `.ADM` over `.RPT`, then by name, which embeds
/// the creation timestamp on the hosts we read from.
fn log_rank(name: &str) -> Option<(u8, String)> {
    let lower = name.to_ascii_lowercase();
    if lower.contains("crash") {
        return None;
    }
    let priority = if lower.ends_with(".adm") {
        2
    } else if lower.ends_with(".rpt") {
        1
    } else {
        return None;
    };
    Some((priority, name.to_string()))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// True when `candidate` ranks above `current`.
fn is_newer(candidate: &str, current: &str) -> bool {
    match (log_rank(file_name(candidate)), log_rank(file_name(current))) {
        (Some(a), Some(b)) => a.cmp(&b) == Ordering::Greater,
        (Some(_), None) => true,
        _ => false,
    }
}

/// How far back first discovery looks for a line boundary.
const LINE_ALIGN_WINDOW: u64 = 64 * 1024;

pub struct Tailer {
    transport: Arc<dyn RemoteTransport>,
    cursors: Arc<dyn CursorStore>,
    source_id: String,
    settings: TailSettings,
    /// Last committed cursor, `None` until loaded from the store
    cursor: Option<LogCursor>,
    /// Set once any file has been tracked; later discoveries read from the start
    ever_tracked: bool,
    /// Path and size of the last poll that made no progress on an unfinished line
    stalled: Option<(String, u64)>,
}

impl Tailer {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        cursors: Arc<dyn CursorStore>,
        source_id: impl Into<String>,
        settings: TailSettings,
    ) -> Self {
        Self {
            transport,
            cursors,
            source_id: source_id.into(),
            settings,
            cursor: None,
            ever_tracked: false,
            stalled: None,
        }
    }

    pub fn update_settings(&mut self, settings: TailSettings) {
        self.settings = settings;
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// The last committed cursor, if one has been loaded.
    pub fn cursor(&self) -> Option<&LogCursor> {
        self.cursor.as_ref()
    }

    async fn committed(&mut self, now: DateTime<Utc>) -> Result<LogCursor, StoreError> {
        if let Some(cursor) = &self.cursor {
            return Ok(cursor.clone());
        }

        let cursor = match self.cursors.load_cursor(&self.source_id).await? {
            Some(stored) => {
                self.ever_tracked = stored.path.is_some();
                info!(
                    "📍 Resuming {} at {}:{}",
                    self.source_id,
                    stored.path.as_deref().unwrap_or("<none>"),
                    stored.byte_offset
                );
                stored
            }
            None => LogCursor::empty(&self.source_id, now),
        };
        self.cursor = Some(cursor.clone());
        Ok(cursor)
    }

    /// Fetches whatever was appended since the committed cursor.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> Result<Batch, TailError> {
        let mut cursor = self.committed(now).await?;
        let mut rotated = false;

        if let Some(path) = cursor.path.clone() {
            match self.transport.size(&path).await {
                Ok(size) if size < cursor.byte_offset => {
                    warn!(
                        "🔄 {} shrank from {} to {} bytes, treating as rotation",
                        path, cursor.byte_offset, size
                    );
                    cursor.path = None;
                    cursor.byte_offset = 0;
                    rotated = true;
                }
                Ok(size) if size == cursor.byte_offset => {
                    // Drained; the server may have moved on to a new file.
                    match self.discover().await? {
                        Some(newer) if newer != path && is_newer(&newer, &path) => {
                            info!("🔄 Switching from {} to newer log {}", path, newer);
                            cursor.path = Some(newer);
                            cursor.byte_offset = 0;
                            rotated = true;
                        }
                        _ => {
                            return Ok(Batch {
                                lines: Vec::new(),
                                cursor,
                                rotated: false,
                            })
                        }
                    }
                }
                Ok(size) => {
                    let batch = self.fetch(cursor.clone(), size, now, false).await?;
                    if batch.cursor.byte_offset != cursor.byte_offset {
                        self.stalled = None;
                        return Ok(batch);
                    }

                    // Only an unterminated tail is left. If it did not grow
                    // since the last poll and a newer log exists, the writer
                    // has moved on and the fragment will never be completed.
                    let unchanged = self.stalled.as_ref() == Some(&(path.clone(), size));
                    self.stalled = Some((path.clone(), size));
                    if !unchanged {
                        return Ok(batch);
                    }
                    match self.discover().await? {
                        Some(newer) if newer != path && is_newer(&newer, &path) => {
                            warn!(
                                "✂️ Dropping {} unterminated bytes at the end of {}, switching to newer log {}",
                                size - cursor.byte_offset,
                                path,
                                newer
                            );
                            cursor.path = Some(newer);
                            cursor.byte_offset = 0;
                            rotated = true;
                            self.stalled = None;
                        }
                        _ => return Ok(batch),
                    }
                }
                Err(err) if err.is_not_found() => {
                    warn!("🔄 {} disappeared, treating as rotation", path);
                    cursor.path = None;
                    cursor.byte_offset = 0;
                    rotated = true;
                }
                Err(err) => return Err(err.into()),
            }
        }

        if cursor.path.is_none() {
            let Some(path) = self.discover().await? else {
                debug!("No eligible log file under {:?}", self.settings.roots);
                cursor.updated_at = now;
                return Ok(Batch {
                    lines: Vec::new(),
                    cursor,
                    rotated,
                });
            };

            let size = self.transport.size(&path).await?;
            let from_start = rotated || self.ever_tracked;
            cursor.byte_offset = if from_start {
                0
            } else {
                self.line_start_before(&path, size).await?
            };
            info!("📄 Tracking {} from offset {}", path, cursor.byte_offset);
            cursor.path = Some(path);
            return self.fetch(cursor, size, now, true).await;
        }

        // A newer file was picked while the old one was drained.
        let size = match cursor.path.as_deref() {
            Some(path) => self.transport.size(path).await?,
            None => 0,
        };
        self.fetch(cursor, size, now, rotated).await
    }

    async fn fetch(
        &self,
        mut cursor: LogCursor,
        size: u64,
        now: DateTime<Utc>,
        rotated: bool,
    ) -> Result<Batch, TailError> {
        cursor.updated_at = now;
        let Some(path) = cursor.path.clone() else {
            return Ok(Batch { lines: Vec::new(), cursor, rotated });
        };

        let start = cursor.byte_offset;
        let len = size.saturating_sub(start).min(self.settings.max_fetch_bytes);
        if len == 0 {
            return Ok(Batch { lines: Vec::new(), cursor, rotated });
        }

        let data = if self.transport.supports_partial_reads() {
            self.transport.read_range(&path, start, len).await?
        } else {
            let all = self.transport.read_all(&path).await?;
            let begin = (start as usize).min(all.len());
            let end = begin.saturating_add(len as usize).min(all.len());
            all[begin..end].to_vec()
        };

        let capped = len == self.settings.max_fetch_bytes;
        let (lines, consumed) = split_lines(&path, start, &data, capped);
        cursor.byte_offset = start + consumed;
        debug!(
            "Fetched {} bytes from {} ({} lines, offset now {})",
            data.len(),
            path,
            lines.len(),
            cursor.byte_offset
        );

        Ok(Batch { lines, cursor, rotated })
    }

    /// Offset just past the last newline before `size`, so tracking a file
    /// that is being written never starts inside a line.
    async fn line_start_before(&self, path: &str, size: u64) -> Result<u64, TransportError> {
        if size == 0 {
            return Ok(0);
        }
        let window = size.min(LINE_ALIGN_WINDOW);
        let start = size - window;
        let data = if self.transport.supports_partial_reads() {
            self.transport.read_range(path, start, window).await?
        } else {
            let all = self.transport.read_all(path).await?;
            let begin = (start as usize).min(all.len());
            let end = (size as usize).min(all.len());
            all[begin..end].to_vec()
        };

        Ok(match data.iter().rposition(|byte| *byte == b'\n') {
            Some(idx) => start + idx as u64 + 1,
            None if start == 0 => 0,
            // One line longer than the window; wait for the next one.
            None => size,
        })
    }

    /// Persists the cursor that follows a successfully processed batch.
    pub async fn commit(&mut self, batch: &Batch) -> Result<(), StoreError> {
        self.cursors.save_cursor(&batch.cursor).await?;
        if batch.cursor.path.is_some() {
            self.ever_tracked = true;
        }
        self.cursor = Some(batch.cursor.clone());
        Ok(())
    }

    /// Starts from a peer's position, e.g. when taking over from a silent primary.
    pub async fn seed_from(&mut self, peer: &LogCursor, now: DateTime<Utc>) -> Result<(), StoreError> {
        let seeded = LogCursor {
            source_id: self.source_id.clone(),
            path: peer.path.clone(),
            byte_offset: peer.byte_offset,
            updated_at: now,
        };
        self.cursors.save_cursor(&seeded).await?;
        self.ever_tracked = seeded.path.is_some() || self.ever_tracked;
        info!(
            "📍 Seeded {} from {} at {}:{}",
            self.source_id,
            peer.source_id,
            seeded.path.as_deref().unwrap_or("<none>"),
            seeded.byte_offset
        );
        self.cursor = Some(seeded);
        Ok(())
    }

    /// Adopts `peer` when it is further along the same file or on a newer one.
    pub async fn adopt_if_ahead(&mut self, peer: &LogCursor, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let own = self.committed(now).await?;
        let Some(peer_path) = peer.path.as_deref() else {
            return Ok(false);
        };

        let ahead = match own.path.as_deref() {
            None => true,
            Some(own_path) if own_path == peer_path => peer.byte_offset > own.byte_offset,
            Some(own_path) => is_newer(peer_path, own_path),
        };
        if ahead {
            self.seed_from(peer, now).await?;
        }
        Ok(ahead)
    }

    /// Persists the committed cursor again, used on shutdown.
    pub async fn persist(&self) -> Result<(), StoreError> {
        match &self.cursor {
            Some(cursor) => self.cursors.save_cursor(cursor).await,
            None => Ok(()),
        }
    }

    /// Newest eligible log under the configured roots.
    async fn discover(&self) -> Result<Option<String>, TransportError> {
        let mut best: Option<((u8, String), String)> = None;
        let mut pending: Vec<(String, usize)> = self
            .settings
            .roots
            .iter()
            .map(|root| (root.clone(), 0))
            .collect();

        while let Some((dir, depth)) = pending.pop() {
            let entries = match self.transport.list(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.is_not_found() => {
                    warn!("⚠️ Log directory {} not found on {}", dir, self.transport.name());
                    continue;
                }
                Err(err) => return Err(err),
            };

            for entry in entries {
                if entry.is_dir {
                    if depth < self.settings.max_depth {
                        pending.push((entry.path, depth + 1));
                    }
                    continue;
                }
                if let Some(rank) = log_rank(&entry.name) {
                    if best.as_ref().map_or(true, |(current, _)| rank > *current) {
                        best = Some((rank, entry.path));
                    }
                }
            }
        }

        Ok(best.map(|(_, path)| path))
    }
}

/// Splits complete lines out of `data`, which starts at `start` in `path`.
/// Returns the lines and the number of bytes they cover; a trailing partial
/// line is left for the next cycle unless the fetch was capped and holds no
/// newline at all, in which case the whole chunk is emitted to keep moving.
fn split_lines(path: &str, start: u64, data: &[u8], capped: bool) -> (Vec<LogLine>, u64) {
    let complete_len = match data.iter().rposition(|byte| *byte == b'\n') {
        Some(last) => last + 1,
        None if capped && !data.is_empty() => {
            warn!("⚠️ Line at {}:{} exceeds the fetch cap, emitting it split", path, start);
            data.len()
        }
        None => return (Vec::new(), 0),
    };

    let mut lines = Vec::new();
    let mut position = 0usize;
    for chunk in data[..complete_len].split(|byte| *byte == b'\n') {
        let offset = start + position as u64;
        position += chunk.len() + 1;
        if offset >= start + complete_len as u64 {
            break;
        }
        let text = String::from_utf8_lossy(chunk);
        let text = text.trim_end_matches('\r');
        if !text.trim().is_empty() {
            lines.push(LogLine::new(path, offset, text));
        }
    }

    (lines, complete_len as u64)
}
