//! UploadService — the ingestion pipeline.
//!
//! An upload passes these gates in order, and any failure aborts the request:
//! identity, filename, extension allowlist, magic-byte signature, then a
//! bounded streaming copy to a temporary file. Only after the copy completes
//! is an identifier generated, the payload linked to `base_path/{id}.{ext}`
//! and the record handed to the [`OwnershipRegistry`].

use crate::{
    models::file_record::FileRecord,
    services::{
        registry::{OwnershipRegistry, RegistryError},
        signature::{FileKind, SIGNATURE_PREFIX_LEN, normalized_extension},
    },
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    time::timeout,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing user identity")]
    Unauthenticated,
    #[error("{0}")]
    BadRequest(String),
    #[error("file type not allowed")]
    UnsupportedType { extension: Option<String> },
    #[error("file content does not match the `.{extension}` extension")]
    ContentMismatch { extension: String },
    #[error("file too large (max: {max} bytes)")]
    TooLarge { max: u64 },
    #[error("timed out waiting for upload data")]
    Timeout,
    #[error("failed reading upload body: {0}")]
    BodyRead(io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Bounds applied to every upload.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    /// Largest accepted payload, inclusive.
    pub max_bytes: u64,
    /// How long to wait for each chunk of the body.
    pub read_timeout: Duration,
}

#[derive(Clone)]
pub struct UploadService {
    /// Directory holding stored payloads and in-flight temp files.
    pub base_path: PathBuf,
    limits: UploadLimits,
    registry: OwnershipRegistry,
}

impl UploadService {
    pub fn new(
        base_path: impl Into<PathBuf>,
        limits: UploadLimits,
        registry: OwnershipRegistry,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            limits,
            registry,
        }
    }

    /// Validate, store and register one upload.
    ///
    /// `owner` and `filename` come straight from the request; the filename
    /// is used to pick a type family and is kept for display, nothing else.
    pub async fn ingest<S>(
        &self,
        owner: Option<&str>,
        filename: Option<&str>,
        stream: S,
    ) -> UploadResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let owner = owner
            .filter(|o| !o.trim().is_empty())
            .ok_or(UploadError::Unauthenticated)?;
        let filename = filename
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| UploadError::BadRequest("missing filename".into()))?;

        let (kind, extension) = match normalized_extension(filename) {
            Some(ext) => match FileKind::from_extension(&ext) {
                Some(kind) => (kind, ext),
                None => return Err(UploadError::UnsupportedType { extension: Some(ext) }),
            },
            None => return Err(UploadError::UnsupportedType { extension: None }),
        };

        pin_mut!(stream);

        // --- Signature prefix ---
        let mut head = BytesMut::with_capacity(SIGNATURE_PREFIX_LEN);
        while head.len() < SIGNATURE_PREFIX_LEN {
            match self.next_chunk(&mut stream).await? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => break,
            }
        }
        if !kind.matches(&head) {
            return Err(UploadError::ContentMismatch { extension });
        }
        let mut size_bytes = self.account(0, head.len())?;

        // --- Bounded copy into a temp file ---
        let tmp = TempPath::new(self.base_path.join(format!(".tmp-{}", Uuid::new_v4())));
        let mut file = File::create(tmp.path()).await?;
        let mut digest = Context::new();

        digest.consume(&head);
        file.write_all(&head).await?;
        drop(head);

        while let Some(chunk) = self.next_chunk(&mut stream).await? {
            size_bytes = self.account(size_bytes, chunk.len())?;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        // --- Persist under a server-generated name ---
        let id = Uuid::new_v4();
        let storage_location = self.base_path.join(format!("{}.{}", id, extension));
        tmp.persist(&storage_location).await.map_err(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                UploadError::Registry(RegistryError::Conflict(id))
            } else {
                UploadError::Io(err)
            }
        })?;

        let record = FileRecord {
            id,
            owner: owner.to_string(),
            storage_location,
            original_name: filename.to_string(),
            size_bytes,
            extension,
            checksum: format!("{:x}", digest.compute()),
            created_at: Utc::now(),
        };

        if let Err(err) = self.registry.insert(record.clone()).await {
            error!(file_id = %id, "refusing to register upload: {}", err);
            if let Err(rm_err) = fs::remove_file(&record.storage_location).await {
                warn!(
                    "failed to remove unregistered file {}: {}",
                    record.storage_location.display(),
                    rm_err
                );
            }
            return Err(err.into());
        }

        info!(
            file_id = %record.id,
            owner = %record.owner,
            size = record.size_bytes,
            extension = %record.extension,
            "stored upload"
        );

        Ok(record)
    }

    /// Wait for the next body chunk, bounded by the read timeout.
    async fn next_chunk<S>(&self, stream: &mut S) -> UploadResult<Option<Bytes>>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        match timeout(self.limits.read_timeout, stream.next()).await {
            Err(_) => Err(UploadError::Timeout),
            Ok(None) => Ok(None),
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(err))) => Err(UploadError::BodyRead(err)),
        }
    }

    /// Add `chunk_len` to the running total, failing once it passes the cap.
    fn account(&self, total: u64, chunk_len: usize) -> UploadResult<u64> {
        let total = total.saturating_add(chunk_len as u64);
        if total > self.limits.max_bytes {
            return Err(UploadError::TooLarge {
                max: self.limits.max_bytes,
            });
        }
        Ok(total)
    }
}

/// A temp file path that is deleted on drop unless persisted.
///
/// Covers early returns as well as the request future being dropped when the
/// client disconnects mid-upload.
struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Link the temp file to `dest` without replacing anything already there,
    /// then drop the temp name.
    ///
    /// Volumes without hard links fall back to a rename guarded by an
    /// existence check. Either way an existing `dest` yields `AlreadyExists`.
    async fn persist(mut self, dest: &Path) -> io::Result<()> {
        match fs::hard_link(&self.path, dest).await {
            Ok(()) => {
                self.armed = false;
                if let Err(err) = fs::remove_file(&self.path).await {
                    debug!("failed to remove temp file {}: {}", self.path.display(), err);
                }
                Ok(())
            }
            Err(err) if links_unsupported(&err) => {
                debug!(
                    "hard link into {} failed ({}), renaming instead",
                    dest.display(),
                    err
                );
                if fs::try_exists(dest).await? {
                    return Err(io::Error::new(
                        ErrorKind::AlreadyExists,
                        format!("{} already exists", dest.display()),
                    ));
                }
                fs::rename(&self.path, dest).await?;
                self.armed = false;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Errors a filesystem without hard-link support reports for `link(2)`.
fn links_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Unsupported | ErrorKind::PermissionDenied
    )
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn service(dir: &TempDir, max_bytes: u64) -> (UploadService, OwnershipRegistry) {
        let registry = OwnershipRegistry::default();
        let limits = UploadLimits {
            max_bytes,
            read_timeout: Duration::from_secs(5),
        };
        (
            UploadService::new(dir.path(), limits, registry.clone()),
            registry,
        )
    }

    fn body(chunks: Vec<Vec<u8>>) -> impl Stream<Item = io::Result<Bytes>> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    fn png_bytes(payload_len: usize) -> Vec<u8> {
        let mut data = PNG_MAGIC.to_vec();
        data.extend(std::iter::repeat_n(0xAB, payload_len));
        data
    }

    fn stored_files(dir: &TempDir) -> Vec<PathBuf> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[tokio::test]
    async fn stores_valid_png_under_generated_name() {
        let dir = TempDir::new().unwrap();
        let (service, registry) = service(&dir, 1024);
        let data = png_bytes(100);

        let record = service
            .ingest(Some("u1"), Some("photo.png"), body(vec![data.clone()]))
            .await
            .unwrap();

        assert_eq!(record.size_bytes, 108);
        assert_eq!(record.owner, "u1");
        assert_eq!(record.original_name, "photo.png");
        assert_eq!(record.extension, "png");
        assert_eq!(record.checksum, format!("{:x}", md5::compute(&data)));
        assert_eq!(
            record.storage_location,
            dir.path().join(format!("{}.png", record.id))
        );
        assert_eq!(std::fs::read(&record.storage_location).unwrap(), data);
        assert_eq!(stored_files(&dir), vec![record.storage_location.clone()]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn user_filename_never_reaches_the_path() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);

        let record = service
            .ingest(
                Some("u1"),
                Some("../../outside/Evil Name.PNG"),
                body(vec![png_bytes(4)]),
            )
            .await
            .unwrap();

        assert_eq!(record.extension, "png");
        assert_eq!(record.original_name, "../../outside/Evil Name.PNG");
        assert_eq!(record.storage_location.parent(), Some(dir.path()));
        let name = record.storage_location.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!("{}.png", record.id));
    }

    #[tokio::test]
    async fn signature_split_across_chunks_is_reassembled() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);
        let data = png_bytes(40);
        let chunks = data.chunks(3).map(<[u8]>::to_vec).collect();

        let record = service
            .ingest(Some("u1"), Some("photo.png"), body(chunks))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&record.storage_location).unwrap(), data);
    }

    #[tokio::test]
    async fn missing_identity_is_unauthenticated() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);

        for owner in [None, Some(""), Some("   ")] {
            let err = service
                .ingest(owner, Some("photo.png"), body(vec![png_bytes(4)]))
                .await
                .unwrap_err();
            assert!(matches!(err, UploadError::Unauthenticated), "{owner:?}");
        }
    }

    #[tokio::test]
    async fn missing_filename_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);

        for filename in [None, Some("")] {
            let err = service
                .ingest(Some("u1"), filename, body(vec![png_bytes(4)]))
                .await
                .unwrap_err();
            assert!(matches!(err, UploadError::BadRequest(_)));
        }
    }

    #[tokio::test]
    async fn unlisted_extension_is_rejected_regardless_of_content() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);

        for filename in ["run.exe", "image.gif", "page.html", "README", "photo.png.sh"] {
            let err = service
                .ingest(Some("u1"), Some(filename), body(vec![png_bytes(4)]))
                .await
                .unwrap_err();
            assert!(
                matches!(err, UploadError::UnsupportedType { .. }),
                "{filename} should be unsupported, got {err:?}"
            );
        }
        assert!(stored_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn jpeg_bytes_named_png_is_content_mismatch() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);
        let mut jpeg = b"\xff\xd8\xff\xe0".to_vec();
        jpeg.extend([0u8; 64]);

        let err = service
            .ingest(Some("u1"), Some("evil.png"), body(vec![jpeg]))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ContentMismatch { ref extension } if extension == "png"));
        assert!(stored_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn pdf_bytes_named_png_is_content_mismatch() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);

        let err = service
            .ingest(Some("u1"), Some("photo.png"), body(vec![b"%PDF-1.4 hello".to_vec()]))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ContentMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_body_is_content_mismatch() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);

        let err = service
            .ingest(Some("u1"), Some("doc.pdf"), body(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ContentMismatch { .. }));
    }

    #[tokio::test]
    async fn cap_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 108);

        let record = service
            .ingest(Some("u1"), Some("photo.png"), body(vec![png_bytes(100)]))
            .await
            .unwrap();
        assert_eq!(record.size_bytes, 108);

        let err = service
            .ingest(Some("u1"), Some("photo.png"), body(vec![png_bytes(101)]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { max: 108 }));
    }

    #[tokio::test]
    async fn oversized_stream_is_aborted_and_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let (service, registry) = service(&dir, 5 * 1024 * 1024);
        let mut chunks = vec![b"%PDF-1.7\n".to_vec()];
        chunks.extend((0..6).map(|_| vec![b'x'; 1024 * 1024]));

        let err = service
            .ingest(Some("u1"), Some("doc.pdf"), body(chunks))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert!(stored_files(&dir).is_empty());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn oversized_stream_stops_reading_at_the_cap() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 64);
        let endless = stream::once(async { Ok::<_, io::Error>(Bytes::from_static(b"%PDF-1.7\n")) })
            .chain(stream::repeat_with(|| Ok(Bytes::from_static(&[b'x'; 16]))));

        let err = service
            .ingest(Some("u1"), Some("doc.pdf"), endless)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TooLarge { max: 64 }));
        assert!(stored_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn broken_body_discards_partial_write() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, 1024);
        let chunks = vec![
            Ok(Bytes::from(png_bytes(32))),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ];

        let err = service
            .ingest(Some("u1"), Some("photo.png"), stream::iter(chunks))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::BodyRead(_)));
        assert!(stored_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn stalled_body_times_out_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let registry = OwnershipRegistry::default();
        let limits = UploadLimits {
            max_bytes: 1024,
            read_timeout: Duration::from_millis(50),
        };
        let service = UploadService::new(dir.path(), limits, registry);
        let stalled = stream::once(async { Ok::<_, io::Error>(Bytes::from(png_bytes(8))) })
            .chain(stream::pending());

        let err = service
            .ingest(Some("u1"), Some("photo.png"), stalled)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Timeout));
        assert!(stored_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn persist_never_replaces_an_existing_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("taken.png");
        std::fs::write(&dest, b"existing").unwrap();
        let tmp_path = dir.path().join(".tmp-new");
        std::fs::write(&tmp_path, b"incoming").unwrap();

        let err = TempPath::new(tmp_path.clone())
            .persist(&dest)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&dest).unwrap(), b"existing");
        // The rejected temp file is discarded with the guard.
        assert!(!tmp_path.exists());
        assert_eq!(stored_files(&dir), vec![dest]);
    }

    #[tokio::test]
    async fn persist_moves_temp_file_into_place() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("fresh.pdf");
        let tmp_path = dir.path().join(".tmp-fresh");
        std::fs::write(&tmp_path, b"%PDF-1.7").unwrap();

        TempPath::new(tmp_path.clone()).persist(&dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7");
        assert!(!tmp_path.exists());
    }

    #[test]
    fn missing_link_support_triggers_rename_fallback() {
        assert!(links_unsupported(&io::Error::from(ErrorKind::Unsupported)));
        assert!(links_unsupported(&io::Error::from(ErrorKind::PermissionDenied)));
        assert!(!links_unsupported(&io::Error::from(ErrorKind::AlreadyExists)));
        assert!(!links_unsupported(&io::Error::from(ErrorKind::NotFound)));
    }

    #[tokio::test]
    async fn concurrent_uploads_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let (service, registry) = service(&dir, 1024);

        let mut handles = Vec::new();
        for i in 0..16 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let owner = format!("user-{}", i);
                service
                    .ingest(Some(owner.as_str()), Some("photo.png"), body(vec![png_bytes(i)]))
                    .await
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap().id);
        }
        assert_eq!(ids.len(), 16);
        assert_eq!(registry.len().await, 16);
        assert_eq!(stored_files(&dir).len(), 16);
    }
}
