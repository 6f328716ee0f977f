//! Streaming writes of upload bodies into the storage directory.
//!
//! A body is first streamed into a hidden `.<name>.part` file opened with `create_new`, then
//! fsynced and published under its final name with a hard link, so a stored name never refers to
//! a half-written file. Publishing never replaces an existing file: if something took the name
//! after [`StorageWriter::reserve`] checked it, the write fails as a name collision and the
//! existing file is left alone. The partial file is owned by a drop guard: it is removed on every
//! failure path, including the request future being dropped when the client goes away.

use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::directory::StorageDirectory;
use super::naming::extension_of;
use crate::errors::{Error, Result};

/// A successfully persisted upload. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Generated file name
    pub name: String,
    /// Location relative to the storage root
    pub relative_path: String,
    /// Absolute or config-relative location on disk; not exposed to clients
    #[serde(skip)]
    pub path: PathBuf,
    /// Extension carried over from the original name, without the dot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Bytes written
    pub size: u64,
}

/// Reject destination names that could escape the storage directory.
pub fn validate_name(name: &str) -> Result<()> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', '\0'])
        || name.starts_with('.')
        || Path::new(name).is_absolute();

    if unsafe_name {
        return Err(Error::InvalidName { name: name.to_string() });
    }
    Ok(())
}

/// Writes upload bodies beneath a [`StorageDirectory`].
#[derive(Debug, Clone)]
pub struct StorageWriter {
    directory: Arc<StorageDirectory>,
    /// None means unlimited
    max_file_size: Option<u64>,
}

impl StorageWriter {
    /// `max_file_size` of 0 means unlimited.
    pub fn new(directory: Arc<StorageDirectory>, max_file_size: u64) -> Self {
        Self {
            directory,
            max_file_size: (max_file_size > 0).then_some(max_file_size),
        }
    }

    /// Claim `name` in the storage directory without reading any body bytes.
    ///
    /// Fails with an `AlreadyExists` I/O error (see [`Error::is_name_collision`]) if the name is
    /// taken, so the caller can pick another name before committing the body.
    pub async fn reserve(&self, name: &str) -> Result<Reservation> {
        validate_name(name)?;
        let root = self.directory.ensure().await?;

        let final_path = root.join(name);
        let temp_path = root.join(format!(".{name}.part"));

        let taken = tokio::fs::try_exists(&final_path)
            .await
            .map_err(|e| Error::io(format!("check for existing file {name}"), e))?;
        if taken {
            return Err(Error::io(
                format!("reserve file name {name}"),
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file name already in use"),
            ));
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| Error::io(format!("create partial file for {name}"), e))?;

        Ok(Reservation {
            file,
            partial: PartialFile::new(temp_path),
            final_path,
            name: name.to_string(),
            max_file_size: self.max_file_size,
        })
    }

    /// Stream `body` into the storage directory under `name`.
    pub async fn store<S>(&self, body: S, name: &str) -> Result<StoredFile>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        self.reserve(name).await?.write(body).await
    }
}

/// A claimed destination with its partial file open and ready for the body.
///
/// Dropping a reservation without completing [`Reservation::write`] removes the partial file.
#[derive(Debug)]
pub struct Reservation {
    // Declared before `partial` so the handle is closed before the guard deletes the file
    file: File,
    partial: PartialFile,
    final_path: PathBuf,
    name: String,
    max_file_size: Option<u64>,
}

impl Reservation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream the body to disk and publish it under the reserved name.
    ///
    /// A stream error (client disconnect, truncated multipart part) fails with an I/O error;
    /// an error of kind `FileTooLarge` from the stream, or exceeding the writer's own limit,
    /// fails with [`Error::PayloadTooLarge`]. A file that appeared under the name since the
    /// reservation fails the write with a name collision. In every case nothing is left on disk.
    pub async fn write<S>(mut self, body: S) -> Result<StoredFile>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        let mut body = pin!(body);
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                if e.kind() == std::io::ErrorKind::FileTooLarge {
                    Error::PayloadTooLarge { message: e.to_string() }
                } else {
                    Error::io(format!("receive upload body for {}", self.name), e)
                }
            })?;

            let next_total = written + chunk.len() as u64;
            if let Some(max) = self.max_file_size
                && next_total > max
            {
                debug!(name = %self.name, max_file_size = max, "File size limit exceeded, aborting upload");
                return Err(Error::PayloadTooLarge {
                    message: format!(
                        "File size exceeds maximum allowed size of {} bytes ({} MB)",
                        max,
                        max / (1024 * 1024)
                    ),
                });
            }

            self.file
                .write_all(&chunk)
                .await
                .map_err(|e| Error::io(format!("write {}", self.name), e))?;
            written = next_total;
        }

        if written == 0 {
            return Err(Error::BadRequest {
                message: "File cannot be empty".to_string(),
            });
        }

        self.file.flush().await.map_err(|e| Error::io(format!("flush {}", self.name), e))?;
        self.file.sync_all().await.map_err(|e| Error::io(format!("sync {}", self.name), e))?;

        // Fails with AlreadyExists instead of replacing a file created since reserve
        tokio::fs::hard_link(self.partial.path(), &self.final_path)
            .await
            .map_err(|e| Error::io(format!("publish {}", self.name), e))?;
        match tokio::fs::remove_file(self.partial.path()).await {
            Ok(()) => self.partial.disarm(),
            // the guard retries on drop; the stored file is complete either way
            Err(e) => warn!(name = %self.name, error = %e, "Failed to remove partial upload after publishing"),
        }

        debug!(name = %self.name, size = written, "Stored upload");

        Ok(StoredFile {
            relative_path: self.name.clone(),
            extension: extension_of(&self.name).map(str::to_string),
            name: self.name,
            path: self.final_path,
            size: written,
        })
    }
}

/// Deletes the file at `path` on drop unless disarmed.
#[derive(Debug)]
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Drop may run outside a runtime (future cancelled during shutdown), so use std::fs
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial upload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    const MB: usize = 1024 * 1024;

    fn writer_in(dir: &Path, max_file_size: u64) -> StorageWriter {
        StorageWriter::new(Arc::new(StorageDirectory::new(dir.join("uploads"))), max_file_size)
    }

    fn chunks(count: usize, size: usize) -> Vec<std::io::Result<Bytes>> {
        (0..count).map(|i| Ok(Bytes::from(vec![i as u8; size]))).collect()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_store_reports_size_and_moves_into_place() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        let stored = writer
            .store(stream::iter(chunks(3, 1000)), "1700000000000-000000000000000042.JPG")
            .await
            .unwrap();

        assert_eq!(stored.size, 3000);
        assert_eq!(stored.name, "1700000000000-000000000000000042.JPG");
        assert_eq!(stored.relative_path, stored.name);
        assert_eq!(stored.extension.as_deref(), Some("JPG"));
        assert_eq!(std::fs::read(&stored.path).unwrap().len(), 3000);

        // only the final file, no leftover partial
        assert_eq!(entries(&temp_dir.path().join("uploads")), vec![stored.name.clone()]);
    }

    #[tokio::test]
    async fn test_truncated_stream_leaves_nothing_behind() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        // 10MB upload whose client disconnects after 5MB
        let mut body = chunks(5, MB);
        body.push(Err(std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "client disconnected")));
        body.extend(chunks(5, MB));

        let err = writer.store(stream::iter(body), "cut.png").await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err:?}");
        assert!(!err.is_client_error());

        assert!(entries(&temp_dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_write_leaves_nothing_behind() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        // 5MB arrive, then the stream stalls until the request future is dropped
        let body = stream::iter(chunks(5, MB)).chain(stream::pending());
        let result = tokio::time::timeout(Duration::from_millis(200), writer.store(body, "stalled.png")).await;
        assert!(result.is_err());

        assert!(entries(&temp_dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_size_limit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 2500);

        let err = writer.store(stream::iter(chunks(3, 1000)), "big.png").await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert!(entries(&temp_dir.path().join("uploads")).is_empty());

        // exactly at the limit is fine
        let stored = writer.store(stream::iter(chunks(5, 500)), "ok.png").await.unwrap();
        assert_eq!(stored.size, 2500);
    }

    #[tokio::test]
    async fn test_upstream_size_limit_maps_to_payload_too_large() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::FileTooLarge, "request body too large")),
        ]);
        let err = writer.store(body, "limited.png").await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert!(entries(&temp_dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        let err = writer.store(stream::iter(Vec::<std::io::Result<Bytes>>::new()), "empty.png").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        assert!(entries(&temp_dir.path().join("uploads")).is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_names_rejected_before_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        for name in ["", ".", "..", "../escape.png", "a/b.png", "a\\b.png", "/etc/passwd", ".hidden", "x..png", "nul\0.png"] {
            let err = writer.store(stream::iter(chunks(1, 10)), name).await.unwrap_err();
            assert!(matches!(err, Error::InvalidName { .. }), "{name:?}: {err:?}");
        }

        // validation happens before the directory is even bootstrapped
        assert!(!temp_dir.path().join("uploads").exists());
        assert!(!temp_dir.path().join("escape.png").exists());
    }

    #[tokio::test]
    async fn test_existing_name_is_a_collision() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        writer.store(stream::iter(chunks(1, 10)), "taken.png").await.unwrap();
        let err = writer.reserve("taken.png").await.unwrap_err();
        assert!(err.is_name_collision());

        // the original is untouched
        assert_eq!(std::fs::read(temp_dir.path().join("uploads/taken.png")).unwrap(), vec![0u8; 10]);
    }

    #[tokio::test]
    async fn test_name_taken_after_reserve_is_not_overwritten() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        let reservation = writer.reserve("raced.png").await.unwrap();
        // another writer publishes the same name before this body finishes
        std::fs::write(temp_dir.path().join("uploads/raced.png"), b"first").unwrap();

        let err = reservation.write(stream::iter(chunks(2, 100))).await.unwrap_err();
        assert!(err.is_name_collision(), "{err:?}");
        assert!(!err.is_client_error());

        assert_eq!(std::fs::read(temp_dir.path().join("uploads/raced.png")).unwrap(), b"first");
        assert_eq!(entries(&temp_dir.path().join("uploads")), vec!["raced.png".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_reservation_cleans_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = writer_in(temp_dir.path(), 0);

        let reservation = writer.reserve("abandoned.png").await.unwrap();
        assert_eq!(entries(&temp_dir.path().join("uploads")), vec![".abandoned.png.part".to_string()]);

        drop(reservation);
        assert!(entries(&temp_dir.path().join("uploads")).is_empty());
    }
}
