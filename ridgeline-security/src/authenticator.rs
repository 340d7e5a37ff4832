//! Pluggable credential verification. The SASL state machine in
//! [`crate::session`] only drives the wire handshake; checking a password
//! or SCRAM proof against a real identity store is an external
//! collaborator in spirit (spec §1), so it's kept behind this trait.

use async_trait::async_trait;
use dashmap::DashMap;
use ridgeline_common::error::AuthError;

use crate::scram;

/// Credentials a SCRAM-SHA-256 verifier needs. `stored_key`/`server_key`
/// are derived once at registration time (RFC 5802 §3) — the plaintext
/// password is never retained.
#[derive(Debug, Clone)]
pub struct ScramCredentials {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: Vec<u8>,
    pub server_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    UsernamePassword { username: String, password: String },
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a SASL/PLAIN username/password pair.
    async fn verify_plain(&self, username: &str, password: &str) -> Result<(), AuthError>;

    /// Look up the SCRAM-SHA-256 verifier state registered for `username`.
    async fn scram_credentials(&self, username: &str) -> Option<ScramCredentials>;
}

struct UserRecord {
    password_hash: String,
    scram: ScramCredentials,
}

/// Default `Authenticator`: an in-process user table, the equivalent of a
/// local `users.properties` file. Swap in a directory-backed implementation
/// for anything beyond local testing.
pub struct InMemoryAuthenticator {
    users: DashMap<String, UserRecord>,
}

impl InMemoryAuthenticator {
    pub fn new() -> Self {
        Self { users: DashMap::new() }
    }

    pub fn add_user(&self, username: &str, password: &str) {
        self.users.insert(
            username.to_string(),
            UserRecord {
                password_hash: Self::hash_password(password),
                scram: scram::derive_credentials(password, scram::DEFAULT_ITERATIONS),
            },
        );
    }

    fn hash_password(password: &str) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(password.as_bytes()))
    }
}

impl Default for InMemoryAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for InMemoryAuthenticator {
    async fn verify_plain(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let user = self.users.get(username).ok_or(AuthError::InvalidCredentials)?;
        if user.password_hash == Self::hash_password(password) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    async fn scram_credentials(&self, username: &str) -> Option<ScramCredentials> {
        self.users.get(username).map(|u| u.scram.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_rejects_unknown_user() {
        let auth = InMemoryAuthenticator::new();
        assert!(auth.verify_plain("ghost", "x").await.is_err());
    }

    #[tokio::test]
    async fn plain_accepts_the_registered_password() {
        let auth = InMemoryAuthenticator::new();
        auth.add_user("alice", "hunter2");
        assert!(auth.verify_plain("alice", "hunter2").await.is_ok());
        assert!(auth.verify_plain("alice", "wrong").await.is_err());
    }
}
