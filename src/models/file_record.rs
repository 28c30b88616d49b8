//! Represents one stored upload and who owns it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// A single stored upload.
///
/// The record holds metadata only; the payload lives at `storage_location`,
/// a path derived from `id` and `extension` alone.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Server-generated random identifier.
    pub id: Uuid,

    /// Identity of the uploader. Never changes after creation.
    pub owner: String,

    /// Where the payload lives on disk.
    #[serde(skip)]
    pub storage_location: PathBuf,

    /// Filename as supplied by the client. Display only.
    pub original_name: String,

    /// Exact number of bytes written.
    pub size_bytes: u64,

    /// Lowercased extension that passed the allowlist, without the dot.
    pub extension: String,

    /// Hex MD5 of the payload, computed while streaming.
    pub checksum: String,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_owned_by(&self, caller: &str) -> bool {
        self.owner == caller
    }
}
