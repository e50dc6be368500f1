use std::path::PathBuf;

use offerpipe_bus::BusError;
use thiserror::Error;

/// Errors surfaced by the persistence service.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Transport failure (connection, declaration, consume).
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Artifact could not be written or flushed.
    #[error("failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
