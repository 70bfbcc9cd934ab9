//! Blob Store port (§4.4, C4) plus a local-filesystem reference implementation.

pub mod error;
pub mod fs;

use async_trait::async_trait;
pub use error::{BlobError, Result};

/// Deterministic key layout: `{room_id}/{origin}/{iso_timestamp}-{safe_name}`.
pub fn object_key(room_id: &str, origin: &str, safe_name: &str) -> String {
    let ts = chrono::Utc::now().to_rfc3339();
    format!("{room_id}/{origin}/{ts}-{safe_name}")
}

/// Sanitizes a client-supplied file name into a key-safe segment: strips any
/// path separators and anything outside `[A-Za-z0-9._-]`.
pub fn safe_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Headers the caller should attach to the upload PUT (or, for `UploadBytes`,
/// already applied server-side).
#[derive(Debug, Clone, Default)]
pub struct UploadHeaders {
    pub content_type: Option<String>,
}

/// Brokers object storage for chat file-share uploads and server-generated
/// artifacts. Swappable behind this port without touching the room hub.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns a URL the client can `PUT` the object to directly, valid for
    /// `ttl_secs`, plus the headers it must send.
    async fn generate_upload_url(
        &self,
        key: &str,
        mime: &str,
        ttl_secs: u64,
    ) -> Result<(String, UploadHeaders)>;

    /// Returns a time-limited URL for reading the object back.
    async fn get_signed_download_url(&self, key: &str, ttl_secs: u64) -> Result<String>;

    /// Renames an object in place, returning its new download URL.
    async fn rename(&self, old_key: &str, new_key: &str) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Server-originated artifact (chat-history export, generated file):
    /// writes `bytes` directly and returns its (signed) URL.
    async fn upload_bytes(&self, key: &str, bytes: &[u8], mime: &str) -> Result<String>;
}
