//! Orphaned-media garbage collection.
//!
//! At startup the host application asks the sweep to reconcile the private
//! image directory against the database: any file whose name is not the final
//! path segment of some live `image_uri`, and not on the configured protected
//! list, is deleted. There is no grace period and no soft delete; a file is
//! either referenced or it goes on the next sweep. Individual delete failures
//! are logged and skipped.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::backup::MediaDirLock;
use crate::error::{AppError, AppResult};
use crate::model::uri_file_name;
use crate::store;

/// Filenames the sweep must never delete regardless of references. Carried
/// over from the original application's internal marker files.
pub const DEFAULT_PROTECTED_FILES: &[&str] = &["profileInstalled"];

/// Explicit sweep configuration. The protected list is constructor state, not
/// a module-level global, so hosts with different marker files can differ.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub media_dir: PathBuf,
    pub protected: BTreeSet<String>,
}

impl SweepConfig {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        SweepConfig {
            media_dir: media_dir.into(),
            protected: DEFAULT_PROTECTED_FILES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
        }
    }

    pub fn with_protected<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected.extend(names.into_iter().map(Into::into));
        self
    }
}

/// Which files a sweep would touch. Pure decision, no I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPlan {
    pub delete: Vec<String>,
    pub retain: Vec<String>,
}

/// What a sweep actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub retained: Vec<String>,
    pub failed: Vec<String>,
}

/// Partition on-disk filenames into delete/retain sets. A file is retained if
/// it is referenced (its name matches a referenced URI's final segment) or if
/// it is protected; everything else is deleted.
pub fn partition(
    on_disk: &[String],
    referenced: &BTreeSet<String>,
    protected: &BTreeSet<String>,
) -> SweepPlan {
    let mut plan = SweepPlan::default();
    for name in on_disk {
        if referenced.contains(name) || protected.contains(name) {
            plan.retain.push(name.clone());
        } else {
            plan.delete.push(name.clone());
        }
    }
    plan
}

/// Run one sweep of the configured media directory against the live database.
/// Awaits the shared media lock first so it never races an in-flight backup
/// run. A missing media directory yields an empty report.
pub async fn run(
    pool: &Pool<Sqlite>,
    config: &SweepConfig,
    lock: MediaDirLock,
) -> AppResult<SweepReport> {
    let _guard = lock.lock().await;

    let referenced: BTreeSet<String> = store::referenced_image_uris(pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "load_referenced_uris"))?
        .iter()
        .filter_map(|uri| uri_file_name(uri))
        .map(str::to_owned)
        .collect();

    let mut on_disk = Vec::new();
    match fs::read_dir(&config.media_dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry.map_err(|err| {
                    AppError::from(err).with_context("operation", "read_media_dir")
                })?;
                if entry.path().is_file() {
                    on_disk.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SweepReport::default());
        }
        Err(err) => {
            return Err(AppError::from(err)
                .with_context("operation", "read_media_dir")
                .with_context("path", config.media_dir.display().to_string()));
        }
    }
    on_disk.sort();

    let plan = partition(&on_disk, &referenced, &config.protected);

    let mut report = SweepReport {
        retained: plan.retain,
        ..SweepReport::default()
    };
    for name in plan.delete {
        let path = config.media_dir.join(&name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(target: "larder", event = "orphan_deleted", file = %name);
                report.deleted.push(name);
            }
            Err(err) => {
                warn!(
                    target: "larder",
                    event = "orphan_delete_failed",
                    file = %name,
                    error = %err
                );
                report.failed.push(name);
            }
        }
    }

    info!(
        target: "larder",
        event = "sweep_complete",
        deleted = report.deleted.len(),
        retained = report.retained.len(),
        failed = report.failed.len()
    );

    Ok(report)
}
