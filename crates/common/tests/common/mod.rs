//! Shared test utilities for envelope integration tests
#![allow(dead_code)]

use common::attestation::AttestationToken;
use common::crypto::HybridKeyPair;
use common::testkit::TestAuthority;

pub const BROKER: &str = "https://broker-123456.us-central1.run.app/";

/// A workload as seen from the outside: its key pair and a production token
/// that carries the public half.
pub fn attested_workload(authority: &TestAuthority) -> (HybridKeyPair, AttestationToken) {
    let key_pair = HybridKeyPair::generate();
    let token = authority
        .token(BROKER)
        .production(true)
        .instance("workload-1", "us-central1-a", "test-project")
        .request_key(key_pair.public_key())
        .sign();
    (key_pair, token)
}
