//! Serialization layer for the versioned backup document.
//!
//! The wire format is a single JSON object with camelCase keys. Parsing is
//! schema-tolerant in both directions: unknown fields are ignored and absent
//! collections default to empty, so documents written by older or newer
//! builds still load as long as their declared version is supported.

use thiserror::Error;

use crate::model::{BackupDocument, SUPPORTED_VERSION};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unsupported backup version {found} (this build supports up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("malformed backup payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn serialize(document: &BackupDocument) -> Result<String, DocumentError> {
    Ok(serde_json::to_string(document)?)
}

/// Parse the document shape without judging its version. The orchestrator
/// treats parsing and the version gate as separate stages.
pub fn parse(text: &str) -> Result<BackupDocument, DocumentError> {
    Ok(serde_json::from_str(text)?)
}

/// Reject documents newer than this build can understand. A version failure
/// is terminal for the import attempt; nothing has been applied at this point.
pub fn check_version(document: &BackupDocument) -> Result<(), DocumentError> {
    if document.version > SUPPORTED_VERSION {
        return Err(DocumentError::UnsupportedVersion {
            found: document.version,
            supported: SUPPORTED_VERSION,
        });
    }
    Ok(())
}

/// Parse and version-check in one step.
pub fn deserialize(text: &str) -> Result<BackupDocument, DocumentError> {
    let document = parse(text)?;
    check_version(&document)?;
    Ok(document)
}
