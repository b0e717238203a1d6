//! The external credential check a login is gated in front of.

use async_trait::async_trait;

/// An identity provider able to say whether a password is correct.
///
/// Tollgate never sees or stores password hashes; it only asks the verifier
/// and records the answer. An `Err` means the provider could not answer at
/// all (network failure, outage) and is recorded as neither success nor
/// failure.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use tollgate::CredentialVerifier;
///
/// struct StaticVerifier;
///
/// #[async_trait]
/// impl CredentialVerifier for StaticVerifier {
///     type Error = std::io::Error;
///
///     async fn verify(&self, identifier: &str, password: &str) -> Result<bool, Self::Error> {
///         Ok(identifier == "user@example.com" && password == "Passw0rd!")
///     }
/// }
/// ```
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns `Ok(true)` when the credentials are valid.
    async fn verify(&self, identifier: &str, password: &str) -> Result<bool, Self::Error>;
}
