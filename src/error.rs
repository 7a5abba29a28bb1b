use core::fmt;
use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-timeout network failure (socket, OS, etc.). Never retried.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// No response arrived within the configured timeout on any attempt.
    #[error("timeout waiting for response after {attempts} attempt(s)")]
    Timeout {
        /// Number of send attempts made before giving up.
        attempts: u32,
    },

    /// The caller cancelled an in-flight exchange.
    #[error("operation cancelled")]
    Cancelled,

    /// Peer responded with a malformed or unexpected packet.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Peer responded with a malformed or unexpected packet.
    #[error("protocol error: {0}")]
    ProtocolOwned(String),

    /// Authentication or integrity verification failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// A session operation was invoked out of order.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// Cryptographic failure (invalid key sizes, decrypt failure, etc.).
    #[error("crypto error: {0}")]
    Crypto(&'static str),

    /// Unsupported configuration or protocol feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An IPMI command completed with a non-zero completion code.
    #[error("ipmi completion code {completion_code:#04x}: {description}")]
    CompletionCode {
        /// Raw completion code returned by the BMC.
        completion_code: u8,
        /// Command-specific or generic description of the code.
        description: String,
    },

    /// Every candidate cipher suite failed to establish a session.
    #[error("all cipher suites failed: {}", AttemptList(.0))]
    CipherSuitesExhausted(Vec<SuiteAttemptError>),
}

/// The failure of one cipher-suite attempt during an RMCP+ connect.
#[derive(Debug)]
pub struct SuiteAttemptError {
    /// Cipher suite ID that was tried.
    pub cipher_suite_id: u8,
    /// Why the attempt failed.
    pub error: Box<Error>,
}

struct AttemptList<'a>(&'a [SuiteAttemptError]);

impl fmt::Display for AttemptList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no candidate cipher suites");
        }
        for (i, attempt) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "suite {}: {}", attempt.cipher_suite_id, attempt.error)?;
        }
        Ok(())
    }
}

impl Error {
    pub(crate) fn protocol_owned(msg: impl Into<String>) -> Self {
        Self::ProtocolOwned(msg.into())
    }

    /// Short, stable label for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
            Error::Protocol(_) | Error::ProtocolOwned(_) => "protocol",
            Error::AuthenticationFailed(_) => "authentication",
            Error::InvalidState(_) => "state",
            Error::Crypto(_) => "crypto",
            Error::Unsupported(_) => "unsupported",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::CompletionCode { .. } => "completion_code",
            Error::CipherSuitesExhausted(_) => "cipher_suites_exhausted",
        }
    }

    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
