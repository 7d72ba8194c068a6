//! Snapshot Sync Engine
//!
//! Keeps backups consistent between a snapshot system, a remote object store
//! and a local ledger: creates backups on a schedule, discovers backups made
//! elsewhere, enforces retention limits and uploads what is missing remotely.

pub mod clients;
pub mod clock;
pub mod engine;
pub mod error;
pub mod in_flight;
pub mod ledger;
pub mod models;
pub mod naming;
pub mod retention;
pub mod scheduler;
pub mod settings;

// Re-export commonly used types
pub use clients::{ByteStream, ClientError, ObjectStore, SnapshotClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, PassOutcome};
pub use error::EngineError;
pub use ledger::Ledger;
pub use models::{BackupRecord, BackupStatus, ObjectInfo, SnapshotInfo, SnapshotKind};
pub use retention::RetentionLimits;
pub use scheduler::Scheduler;
pub use settings::{EngineSettings, Timezone};

pub type Result<T> = std::result::Result<T, EngineError>;
