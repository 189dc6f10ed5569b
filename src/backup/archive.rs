//! Archive codec: packs a staging directory into a single deflate-compressed
//! zip and streams an archive back out into an extraction directory.
//!
//! Entry names are relative, forward-slash paths derived from a sorted walk
//! of the staging tree, so the same tree always produces the same entry set.
//! Cleanup of a partially written archive is the caller's responsibility.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open archive source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create archive destination {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive is not a valid zip container: {0}")]
    Format(#[from] ZipError),
    #[error("archive entry has an unsafe path: {0}")]
    EntryPath(String),
    #[error("archive i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to enumerate staging tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// What a pack run produced: entry names in archive order plus the sha256 of
/// the finished file, which the orchestrator logs for later verification.
#[derive(Debug, Clone)]
pub struct PackReport {
    pub entries: Vec<String>,
    pub sha256: String,
}

/// Pack every file under `staging` into a zip at `dest`. Entries are added in
/// sorted path order; directories are implied by entry paths rather than
/// written as separate entries.
pub fn pack_directory(staging: &Path, dest: &Path) -> Result<PackReport, ArchiveError> {
    let file = File::create(dest).map_err(|source| ArchiveError::Create {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = Vec::new();

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(staging).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    for path in paths {
        let relative = path
            .strip_prefix(staging)
            .map_err(|_| ArchiveError::EntryPath(path.display().to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer.start_file(&name, options)?;
        let mut source = File::open(&path).map_err(|source| ArchiveError::Open {
            path: path.clone(),
            source,
        })?;
        io::copy(&mut source, &mut writer)?;
        debug!(target: "larder", event = "archive_entry_packed", entry = %name);
        entries.push(name);
    }

    writer.finish()?;

    let sha256 = file_sha256(dest).map_err(|source| ArchiveError::Open {
        path: dest.to_path_buf(),
        source,
    })?;

    Ok(PackReport { entries, sha256 })
}

/// Extract every entry of the zip at `src` under `dest_dir`, preserving
/// entry-relative paths. Entry order in the archive is irrelevant; nothing
/// assumes the document entry comes before or after image entries. Entries
/// whose names escape `dest_dir` are rejected outright.
pub fn unpack_archive(src: &Path, dest_dir: &Path) -> Result<u64, ArchiveError> {
    let file = File::open(src).map_err(|source| ArchiveError::Open {
        path: src.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file)?;

    let mut extracted = 0_u64;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw_name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(ArchiveError::EntryPath(raw_name));
        };

        let out_path = dest_dir.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path).map_err(|source| ArchiveError::Create {
            path: out_path.clone(),
            source,
        })?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
        debug!(target: "larder", event = "archive_entry_extracted", entry = %raw_name);
    }

    Ok(extracted)
}

/// Hex sha256 of a file's contents.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 131072];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
