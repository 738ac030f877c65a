use std::sync::Arc;

use aes_gcm::aead::OsRng;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use serde_json::{json, Map, Value};

use crate::attestation::{
    AttestationToken, AttestationVerifier, KeySet, StaticKeys, ATTESTATION_ISSUER,
    PRODUCTION_DEBUG_STATUS,
};
use crate::crypto::PublicKey;

/// Lifetime of minted tokens
const TOKEN_LIFETIME_SECS: i64 = 60 * 60;

/// An ES256 signing key posing as the attestation issuer
pub struct TestAuthority {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl Default for TestAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAuthority {
    /// Fresh authority whose key id is derived from its key.
    pub fn new() -> Self {
        Self::generate(None)
    }

    /// Fresh authority that claims a specific key id.
    pub fn with_key_id(kid: impl Into<String>) -> Self {
        Self::generate(Some(kid.into()))
    }

    fn generate(kid: Option<String>) -> Self {
        let secret = p256::SecretKey::random(&mut OsRng);
        let der = secret
            .to_pkcs8_der()
            .expect("encoding a generated key as PKCS#8");
        let encoding_key = EncodingKey::from_ec_der(der.as_bytes());

        let point = secret.public_key().to_encoded_point(false);
        let x = URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point has x"));
        let y = URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point has y"));
        let decoding_key =
            DecodingKey::from_ec_components(&x, &y).expect("components of a valid point");

        let kid = kid.unwrap_or_else(|| format!("test-{}", &x[..12]));

        Self {
            kid,
            encoding_key,
            decoding_key,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// Key set containing this authority's verification key.
    pub fn key_set(&self) -> KeySet {
        KeySet::new().with_key(self.kid.clone(), Algorithm::ES256, self.decoding_key.clone())
    }

    pub fn verifier(&self) -> AttestationVerifier {
        AttestationVerifier::new(Arc::new(StaticKeys::new(self.key_set())))
    }

    /// Start building a token for `audience`.
    pub fn token(&self, audience: impl Into<String>) -> TokenBuilder<'_> {
        TokenBuilder {
            authority: self,
            audience: audience.into(),
            issuer: ATTESTATION_ISSUER.to_string(),
            dbgstat: "enabled".to_string(),
            gce: None,
            nonces: None,
            expires_in: TOKEN_LIFETIME_SECS,
        }
    }
}

/// Claims of a token about to be signed by a [`TestAuthority`]
pub struct TokenBuilder<'a> {
    authority: &'a TestAuthority,
    audience: String,
    issuer: String,
    dbgstat: String,
    gce: Option<Value>,
    nonces: Option<Vec<String>>,
    expires_in: i64,
}

impl TokenBuilder<'_> {
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.dbgstat = if production {
            PRODUCTION_DEBUG_STATUS.to_string()
        } else {
            "enabled".to_string()
        };
        self
    }

    pub fn instance(mut self, name: &str, zone: &str, project_id: &str) -> Self {
        self.gce = Some(json!({
            "instance_name": name,
            "zone": zone,
            "project_id": project_id,
        }));
        self
    }

    pub fn request_key(self, key: &PublicKey) -> Self {
        self.nonces(key.to_nonces())
    }

    pub fn nonces(mut self, nonces: Vec<String>) -> Self {
        self.nonces = Some(nonces);
        self
    }

    /// Make the token expire well outside the verifier's leeway.
    pub fn expired(mut self) -> Self {
        self.expires_in = -TOKEN_LIFETIME_SECS;
        self
    }

    pub fn sign(self) -> AttestationToken {
        let now = chrono::Utc::now().timestamp();

        let mut claims = Map::new();
        claims.insert("iss".into(), json!(self.issuer));
        claims.insert("aud".into(), json!(self.audience));
        claims.insert("iat".into(), json!(now));
        claims.insert("exp".into(), json!(now + self.expires_in));
        claims.insert("dbgstat".into(), json!(self.dbgstat));
        claims.insert("swname".into(), json!("CONFIDENTIAL_SPACE"));
        if let Some(nonces) = self.nonces {
            claims.insert("eat_nonce".into(), json!(nonces));
        }
        if let Some(gce) = self.gce {
            claims.insert("submods".into(), json!({ "gce": gce }));
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.authority.kid.clone());

        let token = encode(&header, &Value::Object(claims), &self.authority.encoding_key)
            .expect("signing with a generated ES256 key");
        AttestationToken::new(token)
    }
}
