use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;

use super::{VerificationError, ATTESTATION_JWKS_URL};

/// How long a fetched key set is trusted before it is fetched again
const KEY_SET_TTL: Duration = Duration::from_secs(60 * 60);
/// Lower bound between two fetches triggered by unknown key ids
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Signing keys of the attestation issuer, indexed by key id
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, (Algorithm, DecodingKey)>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys.keys()).finish()
    }
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, kid: impl Into<String>, algorithm: Algorithm, key: DecodingKey) -> Self {
        self.keys.insert(kid.into(), (algorithm, key));
        self
    }

    /// Build a key set from a JWKS document.
    ///
    /// Keys without an id, or with an algorithm other than RS256/ES256, are
    /// skipped.
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let mut set = Self::new();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                tracing::debug!("skipping signing key without key id");
                continue;
            };
            let Some(algorithm) = jwk_algorithm(jwk) else {
                tracing::debug!(kid, "skipping signing key with unsupported algorithm");
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    set.keys.insert(kid, (algorithm, key));
                }
                Err(e) => tracing::warn!(kid, "skipping unusable signing key: {}", e),
            }
        }
        set
    }

    pub fn get(&self, kid: &str) -> Option<&(Algorithm, DecodingKey)> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    match (&jwk.common.key_algorithm, &jwk.algorithm) {
        (Some(KeyAlgorithm::RS256), AlgorithmParameters::RSA(_)) => Some(Algorithm::RS256),
        (Some(KeyAlgorithm::ES256), AlgorithmParameters::EllipticCurve(_)) => {
            Some(Algorithm::ES256)
        }
        (Some(_), _) => None,
        (None, AlgorithmParameters::RSA(_)) => Some(Algorithm::RS256),
        (None, AlgorithmParameters::EllipticCurve(params)) => match params.curve {
            EllipticCurve::P256 => Some(Algorithm::ES256),
            _ => None,
        },
        (None, _) => None,
    }
}

/// Source of the issuer's signing keys
#[async_trait::async_trait]
pub trait KeyProvider: Send + Sync {
    /// Current key set, possibly cached.
    async fn keys(&self) -> Result<Arc<KeySet>, VerificationError>;

    /// Key set after an attempt to pick up rotated keys.
    async fn refresh(&self) -> Result<Arc<KeySet>, VerificationError> {
        self.keys().await
    }
}

/// A fixed key set, for tests and air-gapped verification
#[derive(Debug, Clone)]
pub struct StaticKeys(Arc<KeySet>);

impl StaticKeys {
    pub fn new(keys: KeySet) -> Self {
        Self(Arc::new(keys))
    }
}

#[async_trait::async_trait]
impl KeyProvider for StaticKeys {
    async fn keys(&self) -> Result<Arc<KeySet>, VerificationError> {
        Ok(self.0.clone())
    }
}

struct CachedKeys {
    fetched_at: Instant,
    keys: Arc<KeySet>,
}

/// Fetches and caches the issuer's published JWKS
pub struct JwksKeyProvider {
    client: reqwest::Client,
    url: String,
    cache: RwLock<Option<CachedKeys>>,
}

impl fmt::Debug for JwksKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksKeyProvider")
            .field("url", &self.url)
            .finish()
    }
}

impl Default for JwksKeyProvider {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl JwksKeyProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            url: ATTESTATION_JWKS_URL.to_string(),
            cache: RwLock::new(None),
        }
    }

    fn cached(&self, max_age: Duration) -> Option<Arc<KeySet>> {
        self.cache
            .read()
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < max_age)
            .map(|cached| cached.keys.clone())
    }

    async fn fetch(&self) -> Result<Arc<KeySet>, VerificationError> {
        let jwks: JwkSet = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| VerificationError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| VerificationError::KeyFetch(e.to_string()))?;

        let keys = Arc::new(KeySet::from_jwks(&jwks));
        tracing::debug!(count = keys.len(), "fetched attestation signing keys");

        *self.cache.write() = Some(CachedKeys {
            fetched_at: Instant::now(),
            keys: keys.clone(),
        });
        Ok(keys)
    }
}

#[async_trait::async_trait]
impl KeyProvider for JwksKeyProvider {
    async fn keys(&self) -> Result<Arc<KeySet>, VerificationError> {
        match self.cached(KEY_SET_TTL) {
            Some(keys) => Ok(keys),
            None => self.fetch().await,
        }
    }

    async fn refresh(&self) -> Result<Arc<KeySet>, VerificationError> {
        // Unknown key ids are attacker controlled, don't let them drive fetches.
        match self.cached(MIN_REFRESH_INTERVAL) {
            Some(keys) => Ok(keys),
            None => self.fetch().await,
        }
    }
}
