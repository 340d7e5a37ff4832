//! SCRAM-SHA-256 primitives (RFC 5802/7677): salted-password derivation at
//! registration time, and the HMAC/hash helpers the handshake in
//! [`crate::session`] needs to verify a client proof without ever touching
//! the stored password in the clear.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::authenticator::ScramCredentials;

pub const DEFAULT_ITERATIONS: u32 = 4096;
const SALT_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn h(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// `Hi(password, salt, iterations)` — PBKDF2 with an HMAC-SHA-256 PRF.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut result = vec![0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password, salt, iterations, &mut result)
        .expect("PBKDF2 should not fail");
    result
}

/// Derive the `StoredKey`/`ServerKey` pair a SCRAM verifier needs, from a
/// plaintext password. Called once when a user is registered; the
/// plaintext password itself is never retained.
pub fn derive_credentials(password: &str, iterations: u32) -> ScramCredentials {
    let salt: Vec<u8> = (0..SALT_LEN).map(|_| rand::random::<u8>()).collect();
    let salted_password = hi(password.as_bytes(), &salt, iterations);
    let client_key = hmac(&salted_password, b"Client Key");
    let stored_key = h(&client_key);
    let server_key = hmac(&salted_password, b"Server Key");
    ScramCredentials {
        salt,
        iterations,
        stored_key,
        server_key,
    }
}

/// Compute the `ClientSignature`/expected proof for an auth message, and
/// verify a client-supplied proof against it without recovering `ClientKey`.
pub fn verify_client_proof(creds: &ScramCredentials, auth_message: &str, client_proof: &[u8]) -> bool {
    let client_signature = hmac(&creds.stored_key, auth_message.as_bytes());
    let recovered_client_key = xor(client_proof, &client_signature);
    h(&recovered_client_key) == creds.stored_key
}

pub fn server_signature(creds: &ScramCredentials, auth_message: &str) -> Vec<u8> {
    hmac(&creds.server_key, auth_message.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_proof_computed_from_the_real_password_verifies() {
        let creds = derive_credentials("s3cret", 1000);
        let salted_password = hi(b"s3cret", &creds.salt, creds.iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let auth_message = "n=user,r=fyko+d2lbbFgONRv9qkxdawL,r=fyko+d2lbbFgONRv9qkxdawLserver-nonce,s=abcd,i=1000,c=biws,r=fyko+d2lbbFgONRv9qkxdawLserver-nonce";
        let client_signature = hmac(&creds.stored_key, auth_message.as_bytes());
        let proof = xor(&client_key, &client_signature);
        assert!(verify_client_proof(&creds, auth_message, &proof));
    }

    #[test]
    fn a_proof_computed_from_the_wrong_password_is_rejected() {
        let creds = derive_credentials("s3cret", 1000);
        let wrong_salted = hi(b"wrong-password", &creds.salt, creds.iterations);
        let wrong_client_key = hmac(&wrong_salted, b"Client Key");
        let auth_message = "n=user,r=x,r=xy,s=abcd,i=1000,c=biws,r=xy";
        let client_signature = hmac(&creds.stored_key, auth_message.as_bytes());
        let proof = xor(&wrong_client_key, &client_signature);
        assert!(!verify_client_proof(&creds, auth_message, &proof));
    }
}
