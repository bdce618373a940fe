//! Archive verification hook
//!
//! Every downloaded archive passes through a `ChartVerifier` before it is
//! cached. Signature schemes plug in here.

use chartserve_core::CacheKey;

use crate::error::{RepoError, Result};

pub trait ChartVerifier: Send + Sync {
    /// Accept or reject one archive
    fn verify(&self, key: &CacheKey, archive: &[u8]) -> Result<()>;
}

/// Accepts every archive
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVerifier;

impl ChartVerifier for NoopVerifier {
    fn verify(&self, _key: &CacheKey, _archive: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Accepts archives whose SHA-256 digest is pinned for their chart version
#[derive(Debug, Clone, Default)]
pub struct PinnedDigestVerifier {
    pins: std::collections::HashMap<(String, String), String>,
}

impl PinnedDigestVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(mut self, name: impl Into<String>, version: impl Into<String>, digest: impl Into<String>) -> Self {
        let digest = digest.into();
        let digest = digest.trim_start_matches("sha256:").to_lowercase();
        self.pins.insert((name.into(), version.into()), digest);
        self
    }
}

impl ChartVerifier for PinnedDigestVerifier {
    fn verify(&self, key: &CacheKey, archive: &[u8]) -> Result<()> {
        let Some(expected) = self.pins.get(&(key.name.clone(), key.version.clone())) else {
            return Ok(());
        };

        let actual = crate::http::compute_digest(archive);
        let actual = actual.trim_start_matches("sha256:");
        if actual != expected {
            return Err(RepoError::VerificationFailed {
                name: key.name.clone(),
                message: format!("digest sha256:{} is not the pinned sha256:{}", actual, expected),
            });
        }
        Ok(())
    }
}
