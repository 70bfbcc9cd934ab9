//! Local-filesystem `BlobStore`, standing in for a presigned-URL object
//! store in dev/test deployments (§4.4.1).

use crate::{BlobError, BlobStore, Result, UploadHeaders};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
    signing_secret: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>, signing_secret: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
            signing_secret: signing_secret.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let joined = self.root.join(key);
        if !joined.starts_with(&self.root) {
            return Err(BlobError::NotFound(key.to_string()));
        }
        Ok(joined)
    }

    fn sign(&self, key: &str, expires_at: u64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.signing_secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(key.as_bytes());
        mac.update(b":");
        mac.update(expires_at.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verifies a `(key, expires_at, signature)` triple pulled off a
    /// download URL. `false` on expiry or tamper.
    pub fn verify_token(&self, key: &str, expires_at: u64, signature: &str) -> bool {
        if now_unix() > expires_at {
            return false;
        }
        let expected = self.sign(key, expires_at);
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }

    fn signed_url(&self, key: &str, ttl_secs: u64) -> String {
        let expires_at = now_unix() + ttl_secs;
        let sig = self.sign(key, expires_at);
        format!("{}/{}?exp={}&sig={}", self.base_url.trim_end_matches('/'), key, expires_at, sig)
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn generate_upload_url(&self, key: &str, mime: &str, ttl_secs: u64) -> Result<(String, UploadHeaders)> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok((
            self.signed_url(key, ttl_secs),
            UploadHeaders {
                content_type: Some(mime.to_string()),
            },
        ))
    }

    async fn get_signed_download_url(&self, key: &str, ttl_secs: u64) -> Result<String> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Err(BlobError::NotFound(key.to_string()));
        }
        Ok(self.signed_url(key, ttl_secs))
    }

    async fn rename(&self, old_key: &str, new_key: &str) -> Result<String> {
        let old_path = self.path_for(old_key)?;
        let new_path = self.path_for(new_key)?;
        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&old_path, &new_path).await?;
        Ok(self.signed_url(new_key, 3600))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_bytes(&self, key: &str, bytes: &[u8], _mime: &str) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(self.signed_url(key, 24 * 3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> FsBlobStore {
        let dir = std::env::temp_dir().join(format!("relayhub-blob-test-{}", uuid::Uuid::new_v4()));
        FsBlobStore::new(dir, "http://localhost:18080/blobs", "test-secret")
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes() {
        let store = temp_store();
        let key = "room-1/chat/2026-01-01T00-00-00Z-report.txt";
        let url = store.upload_bytes(key, b"hello world", "text/plain").await.unwrap();
        assert!(url.contains("sig="));

        let download = store.get_signed_download_url(key, 60).await.unwrap();
        assert!(download.contains(key));
    }

    #[tokio::test]
    async fn missing_key_fails_download() {
        let store = temp_store();
        let err = store.get_signed_download_url("room-1/chat/missing.txt", 60).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn rename_moves_object_and_old_key_is_gone() {
        let store = temp_store();
        let old_key = "room-1/chat/a.txt";
        let new_key = "room-1/chat/b.txt";
        store.upload_bytes(old_key, b"data", "text/plain").await.unwrap();
        store.rename(old_key, new_key).await.unwrap();
        assert!(store.get_signed_download_url(new_key, 60).await.is_ok());
        assert!(store.get_signed_download_url(old_key, 60).await.is_err());
    }

    #[test]
    fn signature_rejects_tampered_expiry() {
        let store = temp_store();
        let key = "room-1/chat/a.txt";
        let expires_at = now_unix() + 60;
        let sig = store.sign(key, expires_at);
        assert!(store.verify_token(key, expires_at, &sig));
        assert!(!store.verify_token(key, expires_at + 1, &sig));
    }

    #[test]
    fn safe_name_strips_path_separators() {
        assert_eq!(crate::safe_name("../../etc/passwd"), "...._.etc_passwd");
        assert_eq!(crate::safe_name("report final.pdf"), "report_final.pdf");
    }
}
