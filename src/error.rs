//! Domain error type shared by every module.

use thiserror::Error;

/// Every failure mode this crate can surface to a human as a single line.
#[derive(Debug, Error)]
pub enum CcSlurmError {
    #[error("{0}")]
    ConfigMissing(String),

    #[error("{0}")]
    OrchestratorFailure(String),

    #[error("{0}")]
    InventoryInvariant(String),

    #[error("{0}")]
    ConfigInvariant(String),

    #[error("{0}")]
    NameCollision(String),

    #[error("{0}")]
    MachineTypeConflict(String),

    #[error("{0}")]
    CommandFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CcSlurmError>;
