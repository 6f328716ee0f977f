//! Lazy, once-per-process creation of the upload root.

use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::errors::{Error, Result};

/// Make sure `path` exists as a directory, creating it and any missing parents.
///
/// Idempotent. Losing a creation race against another task or process is not an error; a
/// non-directory already sitting at `path` is.
pub async fn ensure(path: &Path) -> Result<()> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(Error::io(format!("create upload directory {}", path.display()), e)),
    }

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::io(format!("inspect upload directory {}", path.display()), e))?;

    if !metadata.is_dir() {
        return Err(Error::io(
            format!("use {} as upload directory", path.display()),
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "path exists and is not a directory"),
        ));
    }

    Ok(())
}

/// The process-wide root for stored uploads.
///
/// The directory is bootstrapped on first use. Concurrent first callers wait on a single
/// initialization; after it succeeds every call is a cheap check of the cell. A failed
/// bootstrap leaves the cell empty so a later request can retry.
#[derive(Debug)]
pub struct StorageDirectory {
    root: PathBuf,
    ready: OnceCell<()>,
}

impl StorageDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready: OnceCell::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Bootstrap the directory if needed and return its path.
    pub async fn ensure(&self) -> Result<&Path> {
        self.ready
            .get_or_try_init(|| async {
                debug!(path = %self.root.display(), "Bootstrapping upload directory");
                ensure(&self.root).await?;
                info!(path = %self.root.display(), "Upload directory ready");
                Ok::<(), Error>(())
            })
            .await?;

        Ok(&self.root)
    }
}
