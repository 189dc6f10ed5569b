//! Backup orchestrator: sequences the end-to-end export and import pipelines,
//! reports coarse progress at every stage transition, and converts every
//! stage-level failure into a terminal, user-displayable outcome. Nothing
//! escapes this boundary as an unhandled fault.
//!
//! Both pipelines are strictly sequential: each database, file and archive
//! step is awaited to completion before the next begins. The coordinator
//! holds an advisory lock over the media directory for the whole run so the
//! orphan sweep cannot race an in-flight backup.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::{Pool, Sqlite};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::model::BackupDocument;
use crate::store;

pub mod archive;
pub mod document;
pub mod merge;

pub use archive::{ArchiveError, PackReport};
pub use document::DocumentError;
pub use merge::{MergeError, MergeResult};

/// Name of the document entry inside the archive. The format version lives
/// inside this document; there is no separate meta entry.
pub const DOCUMENT_ENTRY: &str = "backup.json";
/// Directory entry prefix for bundled media files, flattened by filename.
pub const IMAGES_DIR: &str = "images";

const PARTIAL_SUFFIX: &str = ".partial";

/// Advisory lock over the media directory, shared between the coordinator and
/// the orphan sweep.
pub type MediaDirLock = Arc<Mutex<()>>;

/// Observer for coarse progress. Fractions run 0.0 to 1.0; the message is a
/// short status line the caller may render however it likes.
pub trait Progress: Send + Sync {
    fn update(&self, fraction: f32, message: &str);
}

/// Progress sink that discards every update.
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&self, _fraction: f32, _message: &str) {}
}

impl<F> Progress for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn update(&self, fraction: f32, message: &str) {
        self(fraction, message)
    }
}

/// Linear export pipeline stages. Any stage's failure ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportStage {
    SnapshotBuilt,
    Serialized,
    MediaCollected,
    DocumentWritten,
    Archived,
    WrittenToDestination,
    CleanedUp,
}

impl ExportStage {
    fn fraction(self) -> f32 {
        match self {
            ExportStage::SnapshotBuilt => 0.15,
            ExportStage::Serialized => 0.25,
            ExportStage::MediaCollected => 0.55,
            ExportStage::DocumentWritten => 0.65,
            ExportStage::Archived => 0.85,
            ExportStage::WrittenToDestination => 0.95,
            ExportStage::CleanedUp => 0.99,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ExportStage::SnapshotBuilt => "snapshot",
            ExportStage::Serialized => "serialize",
            ExportStage::MediaCollected => "collect media",
            ExportStage::DocumentWritten => "write document",
            ExportStage::Archived => "archive",
            ExportStage::WrittenToDestination => "write destination",
            ExportStage::CleanedUp => "cleanup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportStage {
    Unpacked,
    DocumentParsed,
    VersionChecked,
    Merged,
    MediaRestored,
    CleanedUp,
}

impl ImportStage {
    fn fraction(self) -> f32 {
        match self {
            ImportStage::Unpacked => 0.2,
            ImportStage::DocumentParsed => 0.35,
            ImportStage::VersionChecked => 0.4,
            ImportStage::Merged => 0.75,
            ImportStage::MediaRestored => 0.95,
            ImportStage::CleanedUp => 0.99,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ImportStage::Unpacked => "unpack",
            ImportStage::DocumentParsed => "parse document",
            ImportStage::VersionChecked => "version check",
            ImportStage::Merged => "merge",
            ImportStage::MediaRestored => "restore media",
            ImportStage::CleanedUp => "cleanup",
        }
    }
}

/// Terminal result of an export run. `message` is always displayable.
#[derive(Debug)]
pub struct ExportOutcome {
    pub message: String,
    pub archive_path: Option<PathBuf>,
    pub images_bundled: u64,
    pub archive_sha256: Option<String>,
    pub error: Option<AppError>,
}

impl ExportOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Terminal result of an import run. `media_failed` counts image files that
/// could not be restored; those are logged and excluded, never fatal.
#[derive(Debug)]
pub struct ImportOutcome {
    pub message: String,
    pub merge: Option<MergeResult>,
    pub media_restored: u64,
    pub media_failed: u64,
    pub error: Option<AppError>,
}

impl ImportOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Sequences export and import against one database and one media directory.
pub struct BackupCoordinator {
    pool: Pool<Sqlite>,
    media_dir: PathBuf,
    media_lock: MediaDirLock,
}

impl BackupCoordinator {
    pub fn new(pool: Pool<Sqlite>, media_dir: impl Into<PathBuf>) -> Self {
        BackupCoordinator {
            pool,
            media_dir: media_dir.into(),
            media_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The advisory media-directory lock. The orphan sweep awaits this before
    /// touching the directory.
    pub fn media_lock(&self) -> MediaDirLock {
        self.media_lock.clone()
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Export the full snapshot plus referenced images to a single archive at
    /// `dest`. On failure the partially written output is discarded here, not
    /// left for the caller.
    pub async fn export_to(&self, dest: &Path, progress: &dyn Progress) -> ExportOutcome {
        let _guard = self.media_lock.lock().await;
        progress.update(0.0, "starting export");

        match self.run_export(dest, progress).await {
            Ok((images_bundled, report)) => {
                progress.update(1.0, "export complete");
                info!(
                    target: "larder",
                    event = "export_complete",
                    path = %dest.display(),
                    images = images_bundled,
                    sha256 = %report.sha256
                );
                ExportOutcome {
                    message: format!("✅ Exported successfully ({images_bundled} images)"),
                    archive_path: Some(dest.to_path_buf()),
                    images_bundled,
                    archive_sha256: Some(report.sha256),
                    error: None,
                }
            }
            Err(err) => {
                let stage = err
                    .context()
                    .get("stage")
                    .cloned()
                    .unwrap_or_else(|| "export".to_string());
                let message = format!("❌ {stage} failed: {}", err.message());
                progress.update(1.0, &message);
                warn!(target: "larder", event = "export_failed", stage = %stage, error = %err);
                discard_partial_outputs(dest);
                ExportOutcome {
                    message,
                    archive_path: None,
                    images_bundled: 0,
                    archive_sha256: None,
                    error: Some(err),
                }
            }
        }
    }

    async fn run_export(
        &self,
        dest: &Path,
        progress: &dyn Progress,
    ) -> AppResult<(u64, PackReport)> {
        let snapshot = store::load_snapshot(&self.pool)
            .await
            .map_err(|err| stage_error(AppError::from(err), ExportStage::SnapshotBuilt))?;
        report(progress, ExportStage::SnapshotBuilt);

        let text = document::serialize(&snapshot)
            .map_err(|err| stage_error(document_error(err), ExportStage::Serialized))?;
        report(progress, ExportStage::Serialized);

        let staging = TempDir::new()
            .map_err(|err| stage_error(AppError::from(err), ExportStage::MediaCollected))?;
        let images_bundled = self
            .collect_media(&snapshot, staging.path())
            .map_err(|err| stage_error(err, ExportStage::MediaCollected))?;
        report(progress, ExportStage::MediaCollected);

        fs::write(staging.path().join(DOCUMENT_ENTRY), text.as_bytes())
            .map_err(|err| stage_error(AppError::from(err), ExportStage::DocumentWritten))?;
        report(progress, ExportStage::DocumentWritten);

        let partial = partial_path(dest);
        let pack_report = archive::pack_directory(staging.path(), &partial)
            .map_err(|err| stage_error(archive_error(err), ExportStage::Archived))?;
        report(progress, ExportStage::Archived);

        fs::rename(&partial, dest).map_err(|err| {
            stage_error(
                AppError::from(err).with_context("path", dest.display().to_string()),
                ExportStage::WrittenToDestination,
            )
        })?;
        report(progress, ExportStage::WrittenToDestination);

        // Staging dir cleanup is best-effort on both paths; TempDir handles it.
        drop(staging);
        report(progress, ExportStage::CleanedUp);

        Ok((images_bundled, pack_report))
    }

    /// Copy every image the snapshot references into the staging `images/`
    /// directory, flattened by filename. A referenced file that is missing on
    /// disk is logged and skipped, not fatal.
    fn collect_media(&self, snapshot: &BackupDocument, staging: &Path) -> AppResult<u64> {
        let images_dir = staging.join(IMAGES_DIR);
        fs::create_dir_all(&images_dir)
            .map_err(|err| AppError::from(err).with_context("operation", "create_images_dir"))?;

        let names: BTreeSet<String> = snapshot.referenced_image_names().into_iter().collect();
        let mut copied = 0_u64;
        for name in names {
            let source = self.media_dir.join(&name);
            if !source.is_file() {
                warn!(
                    target: "larder",
                    event = "export_image_missing",
                    file = %name,
                    "Referenced image missing during export"
                );
                continue;
            }
            fs::copy(&source, images_dir.join(&name)).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "copy_export_image")
                    .with_context("file", name.clone())
            })?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Import an archive produced by [`export_to`]. The merge is all-or-nothing
    /// (one transaction); media restore is last-write-wins by filename and
    /// individual copy failures are logged, skipped and counted.
    pub async fn import_from(&self, src: &Path, progress: &dyn Progress) -> ImportOutcome {
        let _guard = self.media_lock.lock().await;
        progress.update(0.0, "starting import");

        match self.run_import(src, progress).await {
            Ok((merge, media_restored, media_failed)) => {
                progress.update(1.0, "import complete");
                let mut message = format!("✅ Imported successfully: {}", merge.describe());
                if media_failed > 0 {
                    message.push_str(&format!("; {media_failed} image(s) failed to restore"));
                }
                ImportOutcome {
                    message,
                    merge: Some(merge),
                    media_restored,
                    media_failed,
                    error: None,
                }
            }
            Err(err) => {
                let stage = err
                    .context()
                    .get("stage")
                    .cloned()
                    .unwrap_or_else(|| "import".to_string());
                let message = format!("❌ {stage} failed: {}", err.message());
                progress.update(1.0, &message);
                warn!(target: "larder", event = "import_failed", stage = %stage, error = %err);
                ImportOutcome {
                    message,
                    merge: None,
                    media_restored: 0,
                    media_failed: 0,
                    error: Some(err),
                }
            }
        }
    }

    async fn run_import(
        &self,
        src: &Path,
        progress: &dyn Progress,
    ) -> AppResult<(MergeResult, u64, u64)> {
        let extraction = TempDir::new()
            .map_err(|err| stage_error(AppError::from(err), ImportStage::Unpacked))?;
        archive::unpack_archive(src, extraction.path())
            .map_err(|err| stage_error(archive_error(err), ImportStage::Unpacked))?;
        report(progress, ImportStage::Unpacked);

        let document_path = extraction.path().join(DOCUMENT_ENTRY);
        let text = fs::read_to_string(&document_path).map_err(|err| {
            stage_error(
                AppError::new(
                    "ARCHIVE/FORMAT",
                    format!("archive has no {DOCUMENT_ENTRY} entry"),
                )
                .with_cause(AppError::from(err)),
                ImportStage::DocumentParsed,
            )
        })?;
        let incoming = document::parse(&text)
            .map_err(|err| stage_error(document_error(err), ImportStage::DocumentParsed))?;
        report(progress, ImportStage::DocumentParsed);

        document::check_version(&incoming)
            .map_err(|err| stage_error(document_error(err), ImportStage::VersionChecked))?;
        report(progress, ImportStage::VersionChecked);

        let merge = merge::import_document(&self.pool, &incoming)
            .await
            .map_err(|err| stage_error(merge_error(err), ImportStage::Merged))?;
        report(progress, ImportStage::Merged);

        let (media_restored, media_failed) = self
            .restore_media(&extraction.path().join(IMAGES_DIR))
            .map_err(|err| stage_error(err, ImportStage::MediaRestored))?;
        report(progress, ImportStage::MediaRestored);

        drop(extraction);
        report(progress, ImportStage::CleanedUp);

        Ok((merge, media_restored, media_failed))
    }

    /// Copy extracted images into the live media directory, overwriting
    /// same-named files unconditionally.
    fn restore_media(&self, extracted_images: &Path) -> AppResult<(u64, u64)> {
        if !extracted_images.is_dir() {
            // A backup with no images has no images/ entries at all.
            return Ok((0, 0));
        }
        fs::create_dir_all(&self.media_dir)
            .map_err(|err| AppError::from(err).with_context("operation", "create_media_dir"))?;

        let mut restored = 0_u64;
        let mut failed = 0_u64;
        let entries = fs::read_dir(extracted_images)
            .map_err(|err| AppError::from(err).with_context("operation", "read_extracted_images"))?;
        for entry in entries {
            let entry =
                entry.map_err(|err| AppError::from(err).with_context("operation", "read_entry"))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            match fs::copy(entry.path(), self.media_dir.join(&name)) {
                Ok(_) => restored += 1,
                Err(err) => {
                    failed += 1;
                    warn!(
                        target: "larder",
                        event = "import_image_restore_failed",
                        file = %name.to_string_lossy(),
                        error = %err
                    );
                }
            }
        }
        Ok((restored, failed))
    }
}

fn report(progress: &dyn Progress, stage: impl StageInfo) {
    progress.update(stage.fraction(), stage.label());
}

trait StageInfo: Copy {
    fn fraction(self) -> f32;
    fn label(self) -> &'static str;
}

impl StageInfo for ExportStage {
    fn fraction(self) -> f32 {
        ExportStage::fraction(self)
    }
    fn label(self) -> &'static str {
        ExportStage::label(self)
    }
}

impl StageInfo for ImportStage {
    fn fraction(self) -> f32 {
        ImportStage::fraction(self)
    }
    fn label(self) -> &'static str {
        ImportStage::label(self)
    }
}

fn stage_error(err: AppError, stage: impl StageInfo) -> AppError {
    err.with_context("stage", stage.label())
}

fn document_error(err: DocumentError) -> AppError {
    match err {
        DocumentError::UnsupportedVersion { found, supported } => AppError::new(
            "BACKUP/VERSION",
            format!("backup version {found} is newer than supported version {supported}"),
        ),
        DocumentError::Malformed(source) => {
            AppError::new("PAYLOAD/MALFORMED", source.to_string())
        }
    }
}

fn archive_error(err: ArchiveError) -> AppError {
    match err {
        ArchiveError::Open { path, source } => AppError::new(
            "STREAM/OPEN",
            format!("cannot open {}: {source}", path.display()),
        ),
        ArchiveError::Create { path, source } => AppError::new(
            "ARCHIVE/WRITE",
            format!("cannot write {}: {source}", path.display()),
        ),
        ArchiveError::Format(source) => AppError::new("ARCHIVE/FORMAT", source.to_string()),
        ArchiveError::EntryPath(name) => {
            AppError::new("ARCHIVE/FORMAT", format!("unsafe entry path: {name}"))
        }
        ArchiveError::Io(source) => AppError::from(source),
        ArchiveError::Walk(source) => {
            AppError::new("ARCHIVE/WRITE", source.to_string())
        }
    }
}

fn merge_error(err: MergeError) -> AppError {
    match err {
        MergeError::Collection { collection, source } => {
            AppError::from(source).with_context("collection", collection)
        }
        MergeError::Database(source) => AppError::from(source),
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// A failed export may leave the `.partial` file behind; the destination
/// itself is only ever created by the final atomic rename.
fn discard_partial_outputs(dest: &Path) {
    let path = partial_path(dest);
    if path.exists() {
        if let Err(err) = fs::remove_file(&path) {
            warn!(
                target: "larder",
                event = "export_partial_cleanup_failed",
                path = %path.display(),
                error = %err
            );
        }
    }
}
