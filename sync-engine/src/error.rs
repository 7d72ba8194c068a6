//! Error types for the sync engine.

use crate::clients::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("A backup named \"{0}\" already exists")]
    NameTaken(String),

    #[error("Backup unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error: {0}")]
    Client(#[from] ClientError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
