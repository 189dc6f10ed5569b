//! larder — backup, restore and media reconciliation for a local pantry
//! database.
//!
//! The crate owns the "engineering core" of a pantry/recipe/shopping-list
//! manager: a versioned JSON snapshot of the whole relational dataset, a zip
//! archive codec that bundles the snapshot with its referenced images, a
//! duplicate-safe merge importer keyed on per-record uuids, the orchestrator
//! that sequences both pipelines with progress reporting, and the startup
//! sweep that deletes image files no database row references anymore.
//!
//! UI, scanning and general CRUD are the host application's business and are
//! deliberately absent here.

pub mod backup;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;
pub mod sweep;

pub use backup::{
    BackupCoordinator, ExportOutcome, ImportOutcome, MediaDirLock, MergeResult, NoProgress,
    Progress,
};
pub use error::{AppError, AppResult};
pub use model::{BackupDocument, SUPPORTED_VERSION};
pub use sweep::{SweepConfig, SweepReport};
