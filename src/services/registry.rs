//! Ownership registry: the only mapping from file identifiers to records.
//!
//! Uploads insert into it; downloads go through [`OwnershipRegistry::authorize_and_fetch`],
//! which refuses to hand a record to anyone but its owner.

use crate::models::file_record::FileRecord;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{fs, sync::RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("file not found")]
    NotFound,
    #[error("file belongs to another user")]
    Forbidden,
    #[error("file id `{0}` is already registered")]
    Conflict(Uuid),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Process-lifetime, in-memory record store.
///
/// Cloning is cheap and every clone shares the same map.
#[derive(Clone, Default)]
pub struct OwnershipRegistry {
    records: Arc<RwLock<HashMap<Uuid, FileRecord>>>,
    /// Report foreign records as missing instead of forbidden.
    conceal_foreign: bool,
}

impl OwnershipRegistry {
    pub fn new(conceal_foreign: bool) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            conceal_foreign,
        }
    }

    /// Register a freshly stored upload.
    ///
    /// An existing id means the generator collided, which is an invariant
    /// violation; the existing record is left untouched.
    pub async fn insert(&self, record: FileRecord) -> RegistryResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(RegistryError::Conflict(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    /// Return the record for `id` if `caller` owns it and its payload is still on disk.
    pub async fn authorize_and_fetch(&self, id: Uuid, caller: &str) -> RegistryResult<FileRecord> {
        let record = {
            let records = self.records.read().await;
            records.get(&id).cloned().ok_or(RegistryError::NotFound)?
        };

        if !record.is_owned_by(caller) {
            debug!(file_id = %id, "denied access to file owned by another user");
            return Err(if self.conceal_foreign {
                RegistryError::NotFound
            } else {
                RegistryError::Forbidden
            });
        }

        match fs::try_exists(&record.storage_location).await {
            Ok(true) => Ok(record),
            Ok(false) => {
                warn!(
                    file_id = %id,
                    path = %record.storage_location.display(),
                    "registered file is missing on disk"
                );
                Err(RegistryError::NotFound)
            }
            Err(err) => {
                warn!(file_id = %id, "could not stat stored file: {}", err);
                Err(RegistryError::NotFound)
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}
