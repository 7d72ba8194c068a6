pub mod record;
pub mod remote;

pub use record::{BackupRecord, BackupStatus};
pub use remote::{ObjectInfo, SnapshotInfo, SnapshotKind};
