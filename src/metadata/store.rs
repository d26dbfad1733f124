//! Persisted metadata store
//!
//! Keeps the verified info dictionary as `metadata.torrent` in the
//! configured directory so a later run can skip the network fetch.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, TorrentError};
use crate::metadata::verify::verify_metadata;
use crate::torrent::{MetadataParser, VerifiedMetadata};

/// File name of the persisted metadata
pub const METADATA_FILE_NAME: &str = "metadata.torrent";

/// Loads and saves `metadata.torrent`
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of the persisted file
    pub fn path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE_NAME)
    }

    /// Load persisted metadata for `info_hash`
    ///
    /// Returns `Ok(None)` when there is no file or when its digest does not
    /// match; the file may hold a bare info dictionary or a whole torrent.
    pub async fn load(&self, info_hash: &[u8; 20]) -> Result<Option<VerifiedMetadata>> {
        let path = self.path();
        let blob = match fs::read(&path).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No persisted metadata at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(storage_error("Failed to read persisted metadata", &path, e)),
        };

        let info = MetadataParser::extract_info_dict(&blob)
            .map_err(|e| e.with_context(format!("while reading {}", path.display())))?;

        match verify_metadata(info, info_hash) {
            Ok(metadata) => {
                info!("Loaded metadata for '{}' from {}", metadata.name, path.display());
                Ok(Some(metadata))
            }
            Err(e @ TorrentError::IntegrityError { .. }) => {
                warn!("Ignoring {}: {}", path.display(), e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the raw info dictionary of `metadata`
    pub async fn save(&self, metadata: &VerifiedMetadata) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("Failed to create metadata directory", &self.dir, e))?;

        let path = self.path();
        fs::write(&path, &metadata.raw_info)
            .await
            .map_err(|e| storage_error("Failed to write metadata", &path, e))?;

        info!("Saved {} bytes of metadata to {}", metadata.raw_info.len(), path.display());
        Ok(path)
    }
}

fn storage_error(message: &str, path: &Path, err: std::io::Error) -> TorrentError {
    TorrentError::storage_error_full(message, path.display().to_string(), err.to_string())
}
