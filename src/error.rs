//! Error types for pairing operations

use std::time::Duration;

use thiserror::Error;
use tonic::{Code, Status};

use crate::crypto::CryptoError;
use crate::pki::PkiError;

/// Text shown to a human for every failed pairing attempt
pub const PAIRING_FAILED_MESSAGE: &str = "pairing failed, please retry pairing from the start";

/// Main error type for pairing operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or expired session, failed decryption, or an explicit rejection
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Human verification has not been granted yet
    #[error("pending verification")]
    Pending,

    /// A decrypted or wire payload is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The responder's reply could not be decrypted or understood
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The issuance retry loop ran past its deadline
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// Cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Certificate authority failure
    #[error("PKI error: {0}")]
    Pki(#[from] PkiError),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Socket or console I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other RPC status
    #[error("rpc error: {0}")]
    Rpc(Status),
}

impl Error {
    /// Create a permission denied error with the given message
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create an invalid argument error with the given message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a protocol error with the given message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Map a status received from the responder back into an error
    pub fn from_status(status: Status) -> Self {
        match status.code() {
            Code::PermissionDenied => Self::PermissionDenied(status.message().to_string()),
            Code::Unauthenticated => Self::Pending,
            Code::InvalidArgument => Self::InvalidArgument(status.message().to_string()),
            _ => Self::Rpc(status),
        }
    }

    /// Whether the initiator should wait and try the same call again
    ///
    /// Everything except [`Error::Pending`] means the pairing must restart.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Message for the human operator
    pub fn user_message(&self) -> &'static str {
        PAIRING_FAILED_MESSAGE
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::PermissionDenied(msg) => Status::permission_denied(msg),
            Error::Pending => Status::unauthenticated("pending"),
            Error::InvalidArgument(msg) => Status::invalid_argument(msg),
            Error::Crypto(_) => Status::permission_denied("cryptographic failure"),
            Error::Pki(
                PkiError::InvalidCsr(_) | PkiError::MissingSubjectAltName | PkiError::InvalidName(_),
            ) => Status::invalid_argument("malformed certificate signing request"),
            Error::Pki(_) => Status::permission_denied("certificate issuance failed"),
            Error::Rpc(status) => status,
            Error::Protocol(_)
            | Error::DeadlineExceeded(_)
            | Error::Transport(_)
            | Error::Io(_) => Status::internal("internal error"),
        }
    }
}
