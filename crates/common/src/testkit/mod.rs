/// Local stand-in for the attestation issuer
///
/// Lets tests mint signed attestation tokens with arbitrary claims and
/// verify them without network access.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestAuthority;
///
/// let authority = TestAuthority::new();
/// let token = authority
///     .token("https://broker.example.com/")
///     .production(true)
///     .instance("workload-1", "us-central1-a", "my-project")
///     .request_key(workload.public_key())
///     .sign();
///
/// let payload = authority
///     .verifier()
///     .verify(&token, "https://broker.example.com/", true)
///     .await?;
/// ```
mod authority;

pub use authority::{TestAuthority, TokenBuilder};
