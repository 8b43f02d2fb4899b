// Attachment blobs on disk, one file per message id, with streaming quota
// enforcement during upload.
use crate::{CacheError, Result};
use beacon_limits::Limiter;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Content-addressed attachment store.
///
/// Total on-disk usage is scanned once at startup and tracked from then on;
/// writes are refused when the global cap would be exceeded. Per-upload
/// limiters are consulted chunk by chunk so a limit hit mid-stream aborts
/// the write and deletes the partial file.
pub struct FileCache {
    dir: PathBuf,
    total_size_limit: u64,
    file_size_limit: u64,
    total_size: Mutex<u64>,
}

impl FileCache {
    pub async fn new(
        dir: impl Into<PathBuf>,
        total_size_limit: u64,
        file_size_limit: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let mut total_size = 0u64;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            total_size += entry.metadata().await?.len();
        }
        Ok(Self {
            dir,
            total_size_limit,
            file_size_limit,
            total_size: Mutex::new(total_size),
        })
    }

    /// Streams `body` to disk under `id`, consulting every limiter for each
    /// chunk. Returns the byte count, or `LimitReached` with no file left
    /// behind.
    pub async fn write<S>(
        &self,
        id: &str,
        mut body: S,
        limiters: &[&dyn Limiter],
    ) -> Result<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        validate_id(id)?;
        let path = self.path(id);
        let mut file = tokio::fs::File::create(&path).await?;
        match self.copy_limited(&mut file, &mut body, limiters).await {
            Ok(written) => {
                file.flush().await?;
                drop(file);
                *self.total_size.lock().expect("size lock") += written;
                Ok(written)
            }
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                Err(err)
            }
        }
    }

    async fn copy_limited<S>(
        &self,
        file: &mut tokio::fs::File,
        body: &mut S,
        limiters: &[&dyn Limiter],
    ) -> Result<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        let total = *self.total_size.lock().expect("size lock");
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let n = chunk.len() as u64;
            if written + n > self.file_size_limit {
                return Err(CacheError::LimitReached);
            }
            if total + written + n > self.total_size_limit {
                return Err(CacheError::LimitReached);
            }
            for limiter in limiters {
                limiter.allow_n(n as i64)?;
            }
            file.write_all(&chunk).await?;
            written += n;
        }
        Ok(written)
    }

    /// Deletes the given attachments; missing files are not an error.
    pub async fn remove(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            validate_id(id)?;
            let path = self.path(id);
            let removed = match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    tokio::fs::remove_file(&path).await?;
                    meta.len()
                }
                Err(_) => continue,
            };
            let mut total = self.total_size.lock().expect("size lock");
            *total = total.saturating_sub(removed);
        }
        Ok(())
    }

    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn total_size(&self) -> u64 {
        *self.total_size.lock().expect("size lock")
    }
}

fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CacheError::FileNotFound(id.to_string()))
    }
}
