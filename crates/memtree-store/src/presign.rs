use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use memtree_core::{BoxError, FileStorage};

use crate::error::{Result, StoreError};

/// Presigner for images served from a local file server.
///
/// URLs look like `{base_url}/{user}/{ref}?expires={unix}&sig={hex}` where
/// the signature is SHA-256 over the secret, user, ref and expiry.
#[derive(Clone)]
pub struct LocalPresigner {
    base_url: String,
    secret: String,
    ttl: Duration,
}

impl LocalPresigner {
    pub fn new(base_url: &str, secret: &str, ttl: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            ttl,
        }
    }

    /// Signed URL for `image_ref`, valid until `now + ttl`.
    pub fn sign_at(&self, user_id: &str, image_ref: &str, now: u64) -> Result<String> {
        let image_ref = image_ref.trim_start_matches('/');
        if image_ref.is_empty() || image_ref.split('/').any(|seg| seg == "..") {
            return Err(StoreError::InvalidData(format!(
                "refusing to sign image ref '{image_ref}'"
            )));
        }
        let expires = now + self.ttl.as_secs();
        let sig = self.signature(user_id, image_ref, expires);
        Ok(format!(
            "{}/{user_id}/{image_ref}?expires={expires}&sig={sig}",
            self.base_url
        ))
    }

    /// Check a signature produced by [`sign_at`](Self::sign_at).
    #[cfg(test)]
    fn verify(&self, user_id: &str, image_ref: &str, expires: u64, sig: &str, now: u64) -> bool {
        now <= expires && self.signature(user_id, image_ref, expires) == sig
    }

    fn signature(&self, user_id: &str, image_ref: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        for part in [self.secret.as_bytes(), user_id.as_bytes(), image_ref.as_bytes()] {
            hasher.update(part);
            hasher.update(b"\n");
        }
        hasher.update(expires.to_string().as_bytes());
        hasher.finalize().iter().fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
    }
}

#[async_trait]
impl FileStorage for LocalPresigner {
    async fn presign(&self, user_id: &str, image_ref: &str) -> std::result::Result<String, BoxError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(self.sign_at(user_id, image_ref, now)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presigner() -> LocalPresigner {
        LocalPresigner::new("http://localhost:8787/files/", "s3cret", Duration::from_secs(600))
    }

    #[test]
    fn test_url_shape() {
        let url = presigner().sign_at("u1", "img/cat.png", 1_000).unwrap();
        assert!(url.starts_with("http://localhost:8787/files/u1/img/cat.png?expires=1600&sig="));
        let sig = url.rsplit("sig=").next().unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify() {
        let p = presigner();
        let url = p.sign_at("u1", "cat.png", 1_000).unwrap();
        let sig = url.rsplit("sig=").next().unwrap();
        assert!(p.verify("u1", "cat.png", 1_600, sig, 1_500));
        assert!(!p.verify("u1", "cat.png", 1_600, sig, 1_601));
        assert!(!p.verify("u2", "cat.png", 1_600, sig, 1_500));

        let other = LocalPresigner::new("http://x", "different", Duration::from_secs(600));
        assert!(!other.verify("u1", "cat.png", 1_600, sig, 1_500));
    }

    #[test]
    fn test_rejects_traversal() {
        let p = presigner();
        assert!(p.sign_at("u1", "../etc/passwd", 0).is_err());
        assert!(p.sign_at("u1", "a/../../b.png", 0).is_err());
        assert!(p.sign_at("u1", "", 0).is_err());
        assert!(p.sign_at("u1", "a..b.png", 0).is_ok());
    }

    #[tokio::test]
    async fn test_file_storage_impl() {
        let url = presigner().presign("u1", "/cat.png").await.unwrap();
        assert!(url.contains("/u1/cat.png?expires="));
    }
}
