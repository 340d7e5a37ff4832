//! Per-connection SASL state machine: negotiate a mechanism via
//! `SaslHandshake`, then drive one or two `SaslAuthenticate` round trips to
//! either an authenticated principal or a rejection. Connection tasks own
//! their own `SaslSession` and never share it (spec §4.6).

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ridgeline_common::error::AuthError;

use crate::authenticator::{Authenticator, ScramCredentials};
use crate::scram;

pub const SUPPORTED_MECHANISMS: &[&str] = &["PLAIN", "SCRAM-SHA-256"];

#[derive(Debug)]
pub enum SaslOutcome {
    /// The handshake needs another `SaslAuthenticate` round trip; send
    /// these exact bytes back as the challenge.
    Continue(Vec<u8>),
    /// Authentication succeeded. `final_message` is `Some` for SCRAM (the
    /// `v=...` server signature the client verifies) and `None` for PLAIN,
    /// which has no server-proof step.
    Authenticated {
        username: String,
        final_message: Option<Vec<u8>>,
    },
}

enum Stage {
    AwaitingMechanism,
    PlainAwaitingResponse,
    ScramAwaitingClientFirst,
    ScramAwaitingClientFinal {
        username: String,
        client_first_bare: String,
        server_first: String,
        combined_nonce: String,
        creds: ScramCredentials,
    },
    Done,
}

pub struct SaslSession {
    authenticator: Arc<dyn Authenticator>,
    stage: Stage,
}

impl SaslSession {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            stage: Stage::AwaitingMechanism,
        }
    }

    /// `SaslHandshake`: pick the mechanism the client asked for, or report
    /// the full supported list (Kafka wire convention lets the client
    /// retry with a mechanism from that list).
    pub fn handshake(&mut self, mechanism: &str) -> Result<(), AuthError> {
        self.stage = match mechanism {
            "PLAIN" => Stage::PlainAwaitingResponse,
            "SCRAM-SHA-256" => Stage::ScramAwaitingClientFirst,
            other => return Err(AuthError::UnsupportedMechanism(other.to_string())),
        };
        Ok(())
    }

    /// `SaslAuthenticate`: feed the next frame of client bytes.
    pub async fn authenticate(&mut self, bytes: &[u8]) -> Result<SaslOutcome, AuthError> {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::PlainAwaitingResponse => self.authenticate_plain(bytes).await,
            Stage::ScramAwaitingClientFirst => self.authenticate_scram_first(bytes).await,
            Stage::ScramAwaitingClientFinal {
                username,
                client_first_bare,
                server_first,
                combined_nonce,
                creds,
            } => {
                self.authenticate_scram_final(bytes, &username, &client_first_bare, &server_first, &combined_nonce, &creds)
            }
            Stage::AwaitingMechanism | Stage::Done => {
                Err(AuthError::AuthenticationFailed("no mechanism negotiated".to_string()))
            }
        }
    }

    async fn authenticate_plain(&mut self, bytes: &[u8]) -> Result<SaslOutcome, AuthError> {
        let fields: Vec<&[u8]> = bytes.split(|&b| b == 0).collect();
        let [_authzid, authcid, passwd] = fields[..] else {
            return Err(AuthError::AuthenticationFailed("malformed PLAIN message".to_string()));
        };
        let username = String::from_utf8_lossy(authcid).into_owned();
        let password = String::from_utf8_lossy(passwd).into_owned();
        self.authenticator.verify_plain(&username, &password).await?;
        Ok(SaslOutcome::Authenticated {
            username,
            final_message: None,
        })
    }

    async fn authenticate_scram_first(&mut self, bytes: &[u8]) -> Result<SaslOutcome, AuthError> {
        let msg = std::str::from_utf8(bytes)
            .map_err(|_| AuthError::AuthenticationFailed("client-first-message is not UTF-8".to_string()))?;
        let bare = msg
            .strip_prefix("n,,")
            .ok_or_else(|| AuthError::AuthenticationFailed("channel binding is not supported".to_string()))?;

        let mut username = None;
        let mut client_nonce = None;
        for field in bare.split(',') {
            if let Some(v) = field.strip_prefix("n=") {
                username = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("r=") {
                client_nonce = Some(v.to_string());
            }
        }
        let username = username.ok_or_else(|| AuthError::AuthenticationFailed("missing username".to_string()))?;
        let client_nonce =
            client_nonce.ok_or_else(|| AuthError::AuthenticationFailed("missing client nonce".to_string()))?;

        let creds = self
            .authenticator
            .scram_credentials(&username)
            .await
            .ok_or(AuthError::InvalidCredentials)?;

        let server_nonce = random_nonce();
        let combined_nonce = format!("{client_nonce}{server_nonce}");
        let server_first = format!("r={combined_nonce},s={},i={}", BASE64.encode(&creds.salt), creds.iterations);

        self.stage = Stage::ScramAwaitingClientFinal {
            username,
            client_first_bare: bare.to_string(),
            server_first: server_first.clone(),
            combined_nonce,
            creds,
        };
        Ok(SaslOutcome::Continue(server_first.into_bytes()))
    }

    fn authenticate_scram_final(
        &mut self,
        bytes: &[u8],
        username: &str,
        client_first_bare: &str,
        server_first: &str,
        combined_nonce: &str,
        creds: &ScramCredentials,
    ) -> Result<SaslOutcome, AuthError> {
        let msg = std::str::from_utf8(bytes)
            .map_err(|_| AuthError::AuthenticationFailed("client-final-message is not UTF-8".to_string()))?;

        let mut channel_binding = None;
        let mut nonce = None;
        let mut proof = None;
        for field in msg.split(',') {
            if let Some(v) = field.strip_prefix("c=") {
                channel_binding = Some(v);
            } else if let Some(v) = field.strip_prefix("r=") {
                nonce = Some(v);
            } else if let Some(v) = field.strip_prefix("p=") {
                proof = Some(v);
            }
        }
        let channel_binding = channel_binding.unwrap_or("biws");
        let nonce = nonce.ok_or_else(|| AuthError::AuthenticationFailed("missing nonce".to_string()))?;
        if nonce != combined_nonce {
            return Err(AuthError::AuthenticationFailed("nonce mismatch".to_string()));
        }
        let proof = proof.ok_or_else(|| AuthError::AuthenticationFailed("missing proof".to_string()))?;
        let proof_bytes = BASE64
            .decode(proof)
            .map_err(|_| AuthError::AuthenticationFailed("proof is not valid base64".to_string()))?;

        let client_final_without_proof = format!("c={channel_binding},r={combined_nonce}");
        let auth_message = format!("{client_first_bare},{server_first},{client_final_without_proof}");

        if !scram::verify_client_proof(creds, &auth_message, &proof_bytes) {
            return Err(AuthError::InvalidCredentials);
        }

        let signature = scram::server_signature(creds, &auth_message);
        let final_message = format!("v={}", BASE64.encode(signature)).into_bytes();
        Ok(SaslOutcome::Authenticated {
            username: username.to_string(),
            final_message: Some(final_message),
        })
    }
}

fn random_nonce() -> String {
    let bytes: Vec<u8> = (0..18).map(|_| rand::random::<u8>()).collect();
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::InMemoryAuthenticator;

    fn authenticator() -> Arc<dyn Authenticator> {
        let auth = InMemoryAuthenticator::new();
        auth.add_user("alice", "hunter2");
        Arc::new(auth)
    }

    #[tokio::test]
    async fn plain_round_trip_succeeds_with_correct_password() {
        let mut session = SaslSession::new(authenticator());
        session.handshake("PLAIN").unwrap();
        let msg = [0u8].iter().chain(b"alice").chain([0u8].iter()).chain(b"hunter2").cloned().collect::<Vec<u8>>();
        let outcome = session.authenticate(&msg).await.unwrap();
        match outcome {
            SaslOutcome::Authenticated { username, final_message } => {
                assert_eq!(username, "alice");
                assert!(final_message.is_none());
            }
            _ => panic!("expected Authenticated"),
        }
    }

    #[tokio::test]
    async fn plain_round_trip_rejects_wrong_password() {
        let mut session = SaslSession::new(authenticator());
        session.handshake("PLAIN").unwrap();
        let msg = [0u8].iter().chain(b"alice").chain([0u8].iter()).chain(b"nope").cloned().collect::<Vec<u8>>();
        assert!(session.authenticate(&msg).await.is_err());
    }

    #[tokio::test]
    async fn unsupported_mechanism_is_rejected_at_handshake() {
        let mut session = SaslSession::new(authenticator());
        assert!(session.handshake("GSSAPI").is_err());
    }

    #[tokio::test]
    async fn scram_round_trip_succeeds_with_correct_password() {
        let mut session = SaslSession::new(authenticator());
        session.handshake("SCRAM-SHA-256").unwrap();

        let client_first_bare = "n=alice,r=clientnonce123";
        let client_first = format!("n,,{client_first_bare}");
        let server_first_bytes = match session.authenticate(client_first.as_bytes()).await.unwrap() {
            SaslOutcome::Continue(bytes) => bytes,
            _ => panic!("expected Continue"),
        };
        let server_first = String::from_utf8(server_first_bytes).unwrap();

        let combined_nonce = server_first
            .split(',')
            .find_map(|f| f.strip_prefix("r="))
            .unwrap()
            .to_string();
        let salt_b64 = server_first.split(',').find_map(|f| f.strip_prefix("s=")).unwrap();
        let iterations: u32 = server_first
            .split(',')
            .find_map(|f| f.strip_prefix("i="))
            .unwrap()
            .parse()
            .unwrap();
        let salt = BASE64.decode(salt_b64).unwrap();

        let salted_password = {
            use hmac::{Hmac, Mac};
            use sha2::Sha256;
            let mut salted = salt.clone();
            salted.extend_from_slice(&1u32.to_be_bytes());
            let mut mac = Hmac::<Sha256>::new_from_slice(b"hunter2").unwrap();
            mac.update(&salted);
            let mut u = mac.finalize().into_bytes().to_vec();
            let mut result = u.clone();
            for _ in 1..iterations {
                let mut mac = Hmac::<Sha256>::new_from_slice(b"hunter2").unwrap();
                mac.update(&u);
                u = mac.finalize().into_bytes().to_vec();
                result = result.iter().zip(&u).map(|(a, b)| a ^ b).collect();
            }
            result
        };
        let client_key = {
            use hmac::{Hmac, Mac};
            use sha2::Sha256;
            let mut mac = Hmac::<Sha256>::new_from_slice(&salted_password).unwrap();
            mac.update(b"Client Key");
            mac.finalize().into_bytes().to_vec()
        };
        let stored_key = {
            use sha2::{Digest, Sha256};
            Sha256::digest(&client_key).to_vec()
        };

        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!("{client_first_bare},{server_first},{client_final_without_proof}");
        let client_signature = {
            use hmac::{Hmac, Mac};
            use sha2::Sha256;
            let mut mac = Hmac::<Sha256>::new_from_slice(&stored_key).unwrap();
            mac.update(auth_message.as_bytes());
            mac.finalize().into_bytes().to_vec()
        };
        let proof: Vec<u8> = client_key.iter().zip(&client_signature).map(|(a, b)| a ^ b).collect();
        let client_final = format!("{client_final_without_proof},p={}", BASE64.encode(proof));

        let outcome = session.authenticate(client_final.as_bytes()).await.unwrap();
        match outcome {
            SaslOutcome::Authenticated { username, final_message } => {
                assert_eq!(username, "alice");
                assert!(final_message.is_some());
            }
            _ => panic!("expected Authenticated"),
        }
    }
}
