//! Disk-backed panel cache
//!
//! Each entry is a single file named by its cache key. The file's
//! modification time is its only metadata: an entry is fresh while
//! `now - mtime < ttl`. Entries are only ever replaced, never deleted.
//!
//! Writes go to a temporary file in the cache directory while the upstream
//! body is streamed to the client; once the body is complete the temporary
//! file is renamed over the entry. Readers therefore never see a partially
//! written entry. Concurrent misses for the same key each write their own
//! temporary file and the last rename wins.
//!
//! A client that stops reading for longer than the write timeout is treated
//! like one that disconnected, so a stalled reader cannot pin the upstream
//! connection or the temporary file.

use crate::body::{abort_client, file_stream, send_chunk, BodySender, CLIENT_WRITE_TIMEOUT};
use crate::cache_key::cache_path;
use crate::error::{FetchError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Prefix of in-flight temporary files inside the cache directory
pub const TEMP_PREFIX: &str = ".cache-";

/// Bytes read up front from a cached file to detect its content type
const SNIFF_LEN: u64 = 512;

/// Result of a cache lookup
#[derive(Debug)]
pub enum CacheLookup {
    Hit(CachedEntry),
    Miss(MissReason),
}

/// Why a lookup did not produce a servable entry
#[derive(Debug, Clone, PartialEq)]
pub enum MissReason {
    /// TTL is zero or negative, so nothing is ever fresh
    NoTtl,
    Absent,
    Stale { age: Duration },
    /// stat, open or read failed; treated like a miss
    ReadFault(String),
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::NoTtl => write!(f, "ttl is not positive"),
            MissReason::Absent => write!(f, "no cached file"),
            MissReason::Stale { age } => write!(f, "cached file is stale (age {:.1}s)", age.as_secs_f64()),
            MissReason::ReadFault(msg) => write!(f, "cache read fault: {}", msg),
        }
    }
}

/// A fresh entry opened for streaming
#[derive(Debug)]
pub struct CachedEntry {
    path: PathBuf,
    head: Bytes,
    file: File,
    age: Duration,
    ttl: Duration,
}

impl CachedEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn age(&self) -> Duration {
        self.age
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Seconds the client may keep this response, `ttl - age` rounded
    pub fn max_age(&self) -> u64 {
        let remaining = self.ttl.as_secs_f64() - self.age.as_secs_f64();
        remaining.round().max(0.0) as u64
    }

    /// Content type detected from the first bytes of the entry
    pub fn content_type(&self) -> &'static str {
        sniff_content_type(&self.head)
    }

    /// Stream the whole entry, starting with the bytes already read
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let head = (!self.head.is_empty()).then_some(Ok(self.head));
        futures::stream::iter(head).chain(file_stream(self.file))
    }
}

/// Outcome of a completed write-through copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteThrough {
    /// Bytes delivered to the client
    pub bytes: u64,
    /// Whether the new entry was renamed into place
    pub installed: bool,
}

/// Temporary file being filled during a write-through
struct TempEntry {
    file: File,
    path: TempPath,
}

/// Disk cache rooted at a single directory
#[derive(Debug, Clone)]
pub struct PanelCache {
    dir: PathBuf,
    write_timeout: Duration,
}

impl PanelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PanelCache {
            dir: dir.into(),
            write_timeout: CLIENT_WRITE_TIMEOUT,
        }
    }

    /// Override how long a write-through waits for a slow client
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `key`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        cache_path(&self.dir, key)
    }

    /// Create the cache directory if it does not exist yet
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            FetchError::CacheWrite(format!("create cache dir {}: {}", self.dir.display(), e))
        })
    }

    /// Look up an entry and open it if it is still fresh
    ///
    /// Never fails: any stat, open or read problem is reported as a miss so
    /// cache faults stay invisible to the client.
    pub async fn try_serve(&self, path: &Path, ttl_seconds: i64) -> CacheLookup {
        if ttl_seconds <= 0 {
            return CacheLookup::Miss(MissReason::NoTtl);
        }

        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return CacheLookup::Miss(MissReason::Absent)
            }
            Err(e) => return CacheLookup::Miss(MissReason::ReadFault(format!("stat: {}", e))),
        };

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => return CacheLookup::Miss(MissReason::ReadFault(format!("mtime: {}", e))),
        };

        // mtime in the future counts as age zero
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        if !is_fresh(age, ttl_seconds) {
            return CacheLookup::Miss(MissReason::Stale { age });
        }

        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) => return CacheLookup::Miss(MissReason::ReadFault(format!("open: {}", e))),
        };

        let mut head = Vec::with_capacity(SNIFF_LEN as usize);
        if let Err(e) = (&mut file).take(SNIFF_LEN).read_to_end(&mut head).await {
            return CacheLookup::Miss(MissReason::ReadFault(format!("read: {}", e)));
        }

        debug!(path = %path.display(), age_secs = age.as_secs_f64(), "cache entry is fresh");

        CacheLookup::Hit(CachedEntry {
            path: path.to_path_buf(),
            head: Bytes::from(head),
            file,
            age,
            ttl: Duration::from_secs(ttl_seconds as u64),
        })
    }

    /// Stream `body` to the client while writing it into the cache
    ///
    /// The entry at `target` is replaced only if the whole body was read and
    /// written. Failing to create, write or rename the temporary file only
    /// disables caching for this response; the client keeps receiving data.
    ///
    /// # Returns
    /// * `Ok(WriteThrough)` once the whole body reached the client
    /// * `Err(FetchError::UpstreamFetch)` if the upstream body failed; the
    ///   client body is aborted and the temporary file removed
    /// * `Err(FetchError::IoError)` if the client disconnected or left a
    ///   chunk unread past the write timeout; the temporary file is removed
    pub async fn write_through<S, E>(
        &self,
        target: &Path,
        body: S,
        client: &BodySender,
    ) -> Result<WriteThrough>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let mut temp = match self.create_temp().await {
            Ok(temp) => Some(temp),
            Err(e) => {
                warn!(error = %e, "error trying to cache file");
                None
            }
        };

        let mut body = std::pin::pin!(body);
        let mut bytes = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Err(abort_client(client, e).await),
            };
            bytes += chunk.len() as u64;

            let write_error = match temp.as_mut() {
                Some(entry) => entry.file.write_all(&chunk).await.err(),
                None => None,
            };
            if let Some(e) = write_error {
                warn!(error = %e, "error trying to cache file");
                temp = None;
            }

            send_chunk(client, chunk, self.write_timeout).await?;
        }

        let installed = match temp {
            Some(entry) => install(entry, target).await,
            None => false,
        };

        Ok(WriteThrough { bytes, installed })
    }

    async fn create_temp(&self) -> Result<TempEntry> {
        let dir = self.dir.clone();
        let named = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)
        })
        .await
        .map_err(|e| FetchError::CacheWrite(format!("temp file task: {}", e)))?
        .map_err(|e| {
            FetchError::CacheWrite(format!("create temp file in {}: {}", self.dir.display(), e))
        })?;
        let (file, path) = named.into_parts();
        Ok(TempEntry {
            file: File::from_std(file),
            path,
        })
    }
}

/// Flush the temporary file and rename it over `target`
///
/// The temporary file is removed on every failure path when its `TempPath`
/// is dropped.
async fn install(entry: TempEntry, target: &Path) -> bool {
    let TempEntry { mut file, path } = entry;

    if let Err(e) = file.flush().await {
        warn!(error = %e, "error trying to cache file");
        return false;
    }
    drop(file);

    // A failed persist drops the TempPath inside the task, removing the file
    let owned_target = target.to_path_buf();
    let persisted = tokio::task::spawn_blocking(move || {
        path.persist(owned_target).map_err(|e| e.error)
    })
    .await
    .unwrap_or_else(|e| Err(io::Error::other(e)));

    match persisted {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, cachefile = %target.display(), "error trying to rename temp file");
            false
        }
    }
}

/// `age < ttl`, and never fresh for a non-positive TTL
pub fn is_fresh(age: Duration, ttl_seconds: i64) -> bool {
    ttl_seconds > 0 && age < Duration::from_secs(ttl_seconds as u64)
}

/// Guess the content type of a cached render from its leading bytes
pub fn sniff_content_type(head: &[u8]) -> &'static str {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

    if head.starts_with(PNG) {
        return "image/png";
    }
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }

    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start();
    if trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && trimmed.contains("<svg")) {
        return "image/svg+xml";
    }

    "application/octet-stream"
}
