use crate::error::{StoreResult, SwarmError};
use crate::store::KeyValueStore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Hex SHA-256 of a canonicalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints `url` after canonicalization (see [`canonicalize_url`]).
    pub fn of_url(url: &str) -> Result<Self, SwarmError> {
        let canonical = canonicalize_url(url)?;
        Ok(Self::of_canonical(&canonical))
    }

    fn of_canonical(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Wraps a fingerprint read back from the store.
    pub fn from_token(token: String) -> Self {
        Fingerprint(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases scheme and host, drops default ports and fragments, and sorts
/// query parameters so that reordered queries compare equal.
pub fn canonicalize_url(url: &str) -> Result<String, SwarmError> {
    let mut parsed =
        Url::parse(url.trim()).map_err(|e| SwarmError::InvalidUrl(format!("{}: {}", url, e)))?;
    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(parsed.to_string())
}

/// Swarm-wide "already claimed" set.
///
/// The same structure serves URL fingerprints (`{ns}:dupefilter`) and movie
/// ids (`{ns}:movie_ids`); both are claimed with one atomic set-add.
pub struct DedupFilter {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl DedupFilter {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// True if this caller is the first to claim `fingerprint`.
    pub async fn claim(&self, fingerprint: &Fingerprint) -> StoreResult<bool> {
        self.claim_raw(fingerprint.as_str()).await
    }

    /// Claims an arbitrary identifier, such as a movie id.
    pub async fn claim_raw(&self, member: &str) -> StoreResult<bool> {
        let claimed = self.store.set_add(&self.key, member).await?;
        if !claimed {
            debug!("{} already claimed in {}", member, self.key);
        }
        Ok(claimed)
    }

    pub async fn len(&self) -> StoreResult<u64> {
        self.store.set_len(&self.key).await
    }

    /// Operator reset. Never called by workers.
    pub async fn reset(&self) -> StoreResult<()> {
        self.store.delete(std::slice::from_ref(&self.key)).await?;
        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
