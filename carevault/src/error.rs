//! Error types for `carevault` operations.

use std::fmt;

use crate::domain::Domain;
use crate::store::StoreError;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for `carevault` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key-encryption key for a domain could not be resolved
    #[error("key resolution failed: {0}")]
    KeyResolution(#[source] KeyProviderError),

    /// A wrapped DEK could not be unwrapped (malformed or wrapped under another KEK)
    #[error("could not unwrap data key: {0}")]
    KeyUnwrap(String),

    /// A ciphertext token did not have the expected `iv.ciphertext.tag` shape
    #[error("malformed ciphertext token: {0}")]
    MalformedToken(String),

    /// Authentication failed while decrypting (wrong key or corrupted data)
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Key material had the wrong size
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// A record did not match its schema before encryption or after decryption
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A single field of a record failed; the whole record is rejected
    #[error("field `{field}` failed: {source}")]
    Field {
        /// Name of the plaintext field that failed
        field: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A referenced document does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A document to be created already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The storage adapter reported a failure
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Configuration is missing or invalid
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn field(field: impl Into<String>, source: Self) -> Self {
        Self::Field { field: field.into(), source: Box::new(source) }
    }

    /// Returns the innermost error, looking through [`Error::Field`] wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Field { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the error means protected data could not be read with the
    /// keys at hand.
    #[must_use]
    pub fn is_key_failure(&self) -> bool {
        matches!(
            self.root(),
            Self::KeyResolution(_)
                | Self::KeyUnwrap(_)
                | Self::MalformedToken(_)
                | Self::Decryption(_)
                | Self::InvalidKeyLength { .. }
        )
    }
}

impl From<KeyProviderError> for Error {
    fn from(err: KeyProviderError) -> Self {
        match err {
            KeyProviderError::UnwrapFailed(msg) => Self::KeyUnwrap(msg),
            other => Self::KeyResolution(other),
        }
    }
}

/// Errors raised by KEK resolver backends.
#[derive(Debug)]
pub enum KeyProviderError {
    /// No KEK path is configured for the domain
    PathNotConfigured(Domain),

    /// KEK not found in the backend
    KekNotFound(String),

    /// The backend could not be reached
    BackendUnavailable(String),

    /// Key material exists but is not a usable 32-byte key
    InvalidKek(String),

    /// The backend never releases raw key material for this KEK
    NotExportable(String),

    /// DEK wrapping failed
    WrapFailed(String),

    /// DEK unwrapping failed
    UnwrapFailed(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathNotConfigured(domain) => {
                write!(f, "no KEK path configured for the {domain} domain")
            }
            Self::KekNotFound(path) => write!(f, "KEK not found: {path}"),
            Self::BackendUnavailable(msg) => write!(f, "key backend unavailable: {msg}"),
            Self::InvalidKek(msg) => write!(f, "invalid KEK: {msg}"),
            Self::NotExportable(path) => write!(f, "KEK is not exportable: {path}"),
            Self::WrapFailed(msg) => write!(f, "DEK wrap failed: {msg}"),
            Self::UnwrapFailed(msg) => write!(f, "DEK unwrap failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
