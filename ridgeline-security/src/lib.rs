//! SASL mechanism negotiation (`PLAIN`, `SCRAM-SHA-256`) and TLS listener
//! setup for the Kafka wire listener. The broker only drives the handshake
//! state machine and the TLS handshake itself; credential verification and
//! certificate provisioning are external collaborators (spec §1/§6).

#![warn(clippy::all)]

mod authenticator;
mod scram;
mod session;
mod tls;

pub use authenticator::{Authenticator, Credentials, InMemoryAuthenticator, ScramCredentials};
pub use session::{SaslOutcome, SaslSession, SUPPORTED_MECHANISMS};
pub use tls::load_acceptor;
