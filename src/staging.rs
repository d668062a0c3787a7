//! Upload staging store.
//!
//! Decouples the upload step from the processing step: an accepted upload is
//! written to disk and registered here under an opaque handle; the processing
//! endpoint later redeems the handle. Handles are random (unguessable),
//! single-use, and expire after a bounded window.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::cache::ExpiringCache;

/// A staged upload awaiting processing.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    /// Where the uploaded bytes were stored.
    pub path: PathBuf,
    /// Original filename as supplied by the client.
    pub filename: String,
    /// Declared MIME type.
    pub mime_type: String,
}

/// TTL-bound store mapping file handles to staged uploads.
#[derive(Debug, Clone)]
pub struct UploadStaging {
    cache: ExpiringCache<PendingUpload>,
    ttl: Duration,
}

impl UploadStaging {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: ExpiringCache::new(),
            ttl,
        }
    }

    /// Register a staged upload and return its handle.
    #[must_use]
    pub fn stage(&self, upload: PendingUpload) -> String {
        let handle = Uuid::new_v4().simple().to_string();
        self.cache.put(handle.clone(), upload, self.ttl);
        handle
    }

    /// Redeem a handle. Returns `None` when the handle is unknown, expired,
    /// or already consumed; a successful redemption invalidates the handle.
    #[must_use]
    pub fn consume(&self, handle: &str) -> Option<PendingUpload> {
        self.cache.take(handle)
    }

    /// Drop expired entries. The backing files are left for the host's
    /// storage cleanup.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> PendingUpload {
        PendingUpload {
            path: PathBuf::from(format!("/tmp/{name}")),
            filename: name.to_string(),
            mime_type: "text/plain".to_string(),
        }
    }

    #[test]
    fn test_stage_and_consume() {
        let staging = UploadStaging::new(Duration::from_secs(3600));
        let handle = staging.stage(upload("notes.txt"));

        let pending = staging.consume(&handle).expect("handle should resolve");
        assert_eq!(pending.filename, "notes.txt");
    }

    #[test]
    fn test_handle_is_single_use() {
        let staging = UploadStaging::new(Duration::from_secs(3600));
        let handle = staging.stage(upload("notes.txt"));

        assert!(staging.consume(&handle).is_some());
        assert!(staging.consume(&handle).is_none());
    }

    #[test]
    fn test_expired_handle_fails() {
        let staging = UploadStaging::new(Duration::from_millis(10));
        let handle = staging.stage(upload("notes.txt"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(staging.consume(&handle).is_none());
    }

    #[test]
    fn test_handles_are_unique_per_upload() {
        let staging = UploadStaging::new(Duration::from_secs(3600));
        let a = staging.stage(upload("a.txt"));
        let b = staging.stage(upload("a.txt"));
        assert_ne!(a, b);
    }
}
