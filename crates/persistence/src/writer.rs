//! Durable artifact writes.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::PersistenceError;

/// Writes each payload to a fresh `offer_<uuid>` file under one directory.
///
/// Filenames are never reused within a run, so concurrent writers and
/// duplicate deliveries cannot overwrite each other; a duplicate delivery
/// simply yields a second file.
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Write the full content and flush it to stable storage.
    ///
    /// Returns the artifact path. The file only counts as persisted once
    /// `sync_all` has succeeded; callers must not acknowledge the source
    /// delivery before this returns.
    pub async fn write(&self, content: &str) -> Result<PathBuf, PersistenceError> {
        let path = self.dir.join(format!("offer_{}", Uuid::new_v4()));
        let write = |source| PersistenceError::Write {
            path: path.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&path).await.map_err(write)?;
        file.write_all(content.as_bytes()).await.map_err(write)?;
        file.sync_all().await.map_err(write)?;
        Ok(path)
    }
}
