//! Error types for pcbook

use tonic::Status;

use crate::auth::Role;

/// Main error type for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A token could not be issued or verified.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A call was rejected by the authorization gate.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A message could not be republished to the bus.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A password could not be hashed.
    #[error("Password hashing failed: {0}")]
    Password(String),

    /// The transport to a remote server failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A remote call returned a non-OK status.
    #[error("RPC failed: {0}")]
    Rpc(#[from] Status),
}

/// Result alias using the crate [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the in-memory and on-disk stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record with the same key is already stored.
    #[error("record {0} already exists")]
    AlreadyExists(String),

    /// The caller went away before the operation completed.
    #[error("request is canceled")]
    Canceled,

    /// The caller's deadline passed before the operation completed.
    #[error("deadline is exceeded")]
    DeadlineExceeded,

    /// Writing to the blob sink failed.
    #[error("blob sink failure: {0}")]
    Io(#[from] std::io::Error),

    /// The per-record visitor of a scan failed.
    #[error("cannot deliver record: {}", .0.message())]
    Visit(Status),
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(_) => Status::already_exists(err.to_string()),
            StoreError::Canceled => Status::cancelled(err.to_string()),
            StoreError::DeadlineExceeded => Status::deadline_exceeded(err.to_string()),
            StoreError::Io(_) => Status::internal(err.to_string()),
            StoreError::Visit(status) => status,
        }
    }
}

/// Failures to issue or verify an access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The token is authentic but its lifetime has ended.
    #[error("token has expired")]
    Expired,

    /// The token is malformed, tampered with or sealed under another key.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Signing a new token failed.
    #[error("cannot sign token: {0}")]
    Encode(String),
}

impl From<TokenError> for Status {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid(_) => {
                Status::unauthenticated(err.to_string())
            }
            TokenError::Encode(_) => Status::internal(err.to_string()),
        }
    }
}

/// Reasons the authorization gate rejects a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `authorization` metadata was supplied.
    #[error("authorization token is not provided")]
    MissingMetadata,

    /// The `authorization` value is not `<scheme> <token>`.
    #[error("authorization header is malformed")]
    MalformedHeader,

    /// The scheme is something other than bearer.
    #[error("unsupported authorization scheme: {0}")]
    UnsupportedScheme(String),

    /// The bearer token failed verification.
    #[error("access token is invalid: {0}")]
    InvalidToken(#[source] TokenError),

    /// The token is valid but its role may not call the method.
    #[error("role {role} has no permission to access {method}")]
    PermissionDenied {
        /// Role carried by the token.
        role: Role,
        /// Fully qualified method name.
        method: String,
    },
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::PermissionDenied { .. } => Status::permission_denied(err.to_string()),
            _ => Status::unauthenticated(err.to_string()),
        }
    }
}

/// Failures to republish a message to the bus.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Nobody is subscribed, so the message was dropped.
    #[error("no subscribers for topic {0}")]
    NoSubscribers(String),

    /// The payload could not be serialized.
    #[error("cannot encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The bus did not accept the message in time.
    #[error("publish to {0} timed out")]
    TimedOut(String),
}
