//! Error types for the Ridgeline broker

use thiserror::Error;

/// Result type alias using Ridgeline's [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the broker
#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("group coordinator error: {0}")]
    Group(#[from] GroupError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage (log/segment) errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),

    #[error("offset out of range: {0}")]
    OffsetOutOfRange(i64),

    #[error("invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("invalid partition count: {0}")]
    InvalidPartitions(String),

    #[error("log is unhealthy and rejects further appends: {0}")]
    LogUnhealthy(String),

    #[error("corrupt segment: {0}")]
    CorruptSegment(String),

    #[error("disk full: {0}")]
    DiskFull(String),
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unsupported version: api_key={api_key} version={version}")]
    UnsupportedVersion { api_key: i16, version: i16 },

    #[error("corrupt message: {0}")]
    CorruptMessage(String),

    #[error("crc mismatch")]
    CrcMismatch,

    #[error("incomplete message")]
    IncompleteMessage,
}

/// Connection / network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("tls error: {0}")]
    TlsError(String),
}

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("unsupported sasl mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Consumer group coordinator errors, mapped 1:1 onto Kafka error codes by the codec layer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    #[error("unknown member id")]
    UnknownMemberId,

    #[error("illegal generation")]
    IllegalGeneration,

    #[error("rebalance in progress")]
    RebalanceInProgress,

    #[error("inconsistent group protocol")]
    InconsistentProtocol,

    #[error("invalid session timeout")]
    InvalidSessionTimeout,

    #[error("coordinator not available")]
    CoordinatorNotAvailable,

    #[error("member id required")]
    MemberIdRequired,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
