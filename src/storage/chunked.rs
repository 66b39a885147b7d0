use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use rand::RngCore;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};

const STAGING_DIR: &str = ".staging";
const META_FILE: &str = "meta";
const MAX_EXTENSION_LEN: usize = 12;

/// Chunked on-disk blob store
///
/// Each blob lives in a directory named by its storage key and is split into
/// fixed-size chunk files (`000000`, `000001`, ...). Writes stage into a
/// hidden directory and commit with a rename, so a blob is never readable
/// half-written.
#[derive(Debug)]
pub struct ChunkedStore {
    root: PathBuf,
    chunk_size: usize,
}

impl ChunkedStore {
    /// Open the store rooted at `base_path`, creating directories as needed
    pub async fn open(base_path: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(AppError::Internal("Chunk size must be positive".to_string()));
        }

        let root = base_path.into();
        fs::create_dir_all(root.join(STAGING_DIR)).await?;

        let store = Self { root, chunk_size };
        store.sweep_staging().await?;
        Ok(store)
    }

    /// Discard staged leftovers from writes that never committed
    async fn sweep_staging(&self) -> Result<()> {
        let staging = self.root.join(STAGING_DIR);
        let mut entries = fs::read_dir(&staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            tracing::warn!("Discarding incomplete upload {:?}", entry.file_name());
            let _ = fs::remove_dir_all(entry.path()).await;
        }
        Ok(())
    }

    fn blob_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn staging_dir(&self, key: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(key)
    }

    /// Stream a payload into the store under `key`, returning the byte count
    ///
    /// The asserted content type is recorded alongside the chunks. Chunks are
    /// staged and fsynced before the final rename makes the blob visible. A
    /// mid-stream error discards the staged data; nothing is committed under
    /// the key.
    pub async fn write_blob<S>(&self, key: &str, content_type: &str, mut payload: S) -> Result<u64>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        let staging = self.staging_dir(key);
        fs::create_dir_all(&staging).await?;

        if let Err(e) = fs::write(staging.join(META_FILE), content_type).await {
            self.discard_staging(key, &staging).await;
            return Err(e.into());
        }

        let mut written: u64 = 0;
        let mut chunk_index: u64 = 0;
        let mut buffer = BytesMut::new();

        while let Some(piece) = payload.next().await {
            let piece = match piece {
                Ok(piece) => piece,
                Err(e) => {
                    self.discard_staging(key, &staging).await;
                    return Err(AppError::Storage(format!(
                        "Upload stream failed for {}: {}",
                        key, e
                    )));
                }
            };

            written += piece.len() as u64;
            buffer.extend_from_slice(&piece);

            while buffer.len() >= self.chunk_size {
                let chunk = buffer.split_to(self.chunk_size).freeze();
                if let Err(e) = write_chunk(&staging, chunk_index, &chunk).await {
                    self.discard_staging(key, &staging).await;
                    return Err(e);
                }
                chunk_index += 1;
            }
        }

        if !buffer.is_empty() {
            let chunk = buffer.freeze();
            if let Err(e) = write_chunk(&staging, chunk_index, &chunk).await {
                self.discard_staging(key, &staging).await;
                return Err(e);
            }
        }

        if let Err(e) = fs::rename(&staging, self.blob_dir(key)).await {
            self.discard_staging(key, &staging).await;
            return Err(AppError::Storage(format!(
                "Failed to commit blob {}: {}",
                key, e
            )));
        }

        tracing::debug!("Stored blob {} ({} bytes)", key, written);
        Ok(written)
    }

    /// Best-effort cleanup after a failed write; a leftover is an orphan the
    /// operator must remove, so failure to clean up is logged, never hidden
    async fn discard_staging(&self, key: &str, staging: &Path) {
        if let Err(e) = fs::remove_dir_all(staging).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("Orphaned partial blob {} left in staging: {}", key, e);
            }
        }
    }

    /// Open a lazy read stream over the blob stored under `key`
    pub async fn read_blob(&self, key: &str) -> Result<BlobStream> {
        let dir = self.blob_dir(key);
        match fs::metadata(&dir).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("No blob stored under {}", key)));
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to open blob {}: {}",
                    key, e
                )));
            }
        }

        let stream = futures::stream::try_unfold(0u64, move |index| {
            let path = dir.join(chunk_name(index));
            async move {
                match fs::read(&path).await {
                    Ok(data) => Ok(Some((Bytes::from(data), index + 1))),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            }
        });

        Ok(BlobStream {
            inner: Box::pin(stream),
        })
    }

    /// Delete the blob stored under `key`
    pub async fn delete_blob(&self, key: &str) -> Result<()> {
        let dir = self.blob_dir(key);
        match fs::metadata(&dir).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("No blob stored under {}", key)));
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to stat blob {}: {}",
                    key, e
                )));
            }
        }

        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to delete blob {}: {}", key, e)))?;

        tracing::debug!("Deleted blob {}", key);
        Ok(())
    }
}

fn chunk_name(index: u64) -> String {
    format!("{:06}", index)
}

async fn write_chunk(dir: &Path, index: u64, data: &Bytes) -> Result<()> {
    let path = dir.join(chunk_name(index));
    let mut file = fs::File::create(&path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Lazy byte stream over a stored blob
pub struct BlobStream {
    inner: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>,
}

impl std::fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream").finish_non_exhaustive()
    }
}

impl Stream for BlobStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Generate a collision-resistant storage key preserving the file extension
///
/// Keys combine a millisecond timestamp with 8 random bytes, so concurrent
/// uploads never collide and a key cannot be guessed from the original name.
/// The original name itself is never used as the key.
pub fn generate_storage_key(original_name: &str) -> String {
    let timestamp = Utc::now().timestamp_millis();
    let mut random = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut random);
    let token = hex::encode(random);

    match file_extension(original_name) {
        Some(ext) => format!("{}-{}.{}", timestamp, token, ext),
        None => format!("{}-{}", timestamp, token),
    }
}

/// Extension after the last dot, reduced to characters safe in a path
fn file_extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let cleaned: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_EXTENSION_LEN)
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
