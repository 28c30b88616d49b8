//! Shared request context handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        registry::OwnershipRegistry,
        upload_service::{UploadLimits, UploadService},
    },
};
use std::path::PathBuf;

/// Explicitly owned application state.
///
/// Each instance carries its own registry, so tests can build a fresh one
/// per case and nothing lives in process-wide globals.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub registry: OwnershipRegistry,
}

impl AppState {
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        limits: UploadLimits,
        conceal_foreign_files: bool,
    ) -> Self {
        let registry = OwnershipRegistry::new(conceal_foreign_files);
        let uploads = UploadService::new(storage_dir, limits, registry.clone());
        Self { uploads, registry }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let limits = UploadLimits {
            max_bytes: cfg.max_upload_bytes,
            read_timeout: cfg.read_timeout(),
        };
        Self::new(&cfg.storage_dir, limits, cfg.conceal_foreign_files)
    }
}
