use serde::{Deserialize, Serialize};

/// Claims of a Confidential Space attestation token that this system reads
///
/// Registered claims (`exp`, `iss`, `aud`) are validated by the JWT layer
/// before these are looked at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationClaims {
    pub iss: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub sub: Option<String>,
    /// Debug status of the VM; production VMs report `disabled-since-boot`
    #[serde(default)]
    pub dbgstat: Option<String>,
    /// Caller-supplied nonces, here the base64 request-encryption key
    #[serde(default)]
    pub eat_nonce: Option<EatNonce>,
    #[serde(default)]
    pub hwmodel: Option<String>,
    #[serde(default)]
    pub swname: Option<String>,
    #[serde(default)]
    pub submods: Option<Submods>,
}

/// `eat_nonce` is a bare string for a single nonce and a list otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EatNonce {
    Single(String),
    Multiple(Vec<String>),
}

impl EatNonce {
    pub fn fragments(&self) -> &[String] {
        match self {
            EatNonce::Single(nonce) => std::slice::from_ref(nonce),
            EatNonce::Multiple(nonces) => nonces,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submods {
    #[serde(default)]
    pub gce: Option<GceClaims>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GceClaims {
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_number: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
}
