//! AWS KMS KEK resolver for `CareVault`.
//!
//! The KEK never leaves KMS: DEKs are wrapped with KMS `Encrypt` and
//! unwrapped with KMS `Decrypt`, and each KEK path is a KMS key id, ARN or
//! alias.
//!
//! # Example
//!
//! ```rust,no_run
//! use carevault::prelude::*;
//! use carevault_kms_aws::AwsKmsResolver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = AwsKmsResolver::from_env().await;
//! let paths = KekPaths::default()
//!     .with(Domain::General, "alias/carevault-general")
//!     .with(Domain::Contact, "alias/carevault-contact")
//!     .with(Domain::Clinical, "alias/carevault-clinical")
//!     .with(Domain::Financial, "alias/carevault-financial");
//! let keys = DekManager::new(resolver, paths);
//! let key = keys.generate_data_key(Domain::Clinical).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # AWS Configuration
//!
//! The resolver uses the AWS SDK's default credential chain:
//! - Environment variables (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`)
//! - AWS credentials file (`~/.aws/credentials`)
//! - IAM instance profile or ECS task role

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::error::Error as StdError;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::error::{DisplayErrorContext, SdkError};
use aws_sdk_kms::operation::decrypt::DecryptError;
use aws_sdk_kms::operation::encrypt::EncryptError;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use carevault::error::KeyProviderError;
use carevault::kek::KekResolver;
use secrecy::{ExposeSecret, SecretVec};
use thiserror::Error;
use tracing::{debug, instrument};

/// Encryption context key binding each wrapped DEK to its KEK path.
pub const CONTEXT_KEY: &str = "carevault:kek-path";

/// Errors specific to AWS KMS operations.
#[derive(Debug, Error)]
pub enum AwsKmsError {
    /// Key not found or disabled in KMS
    #[error("KMS key not found: {0}")]
    KeyNotFound(String),

    /// Ciphertext was produced by another key or with another context
    #[error("KMS rejected the ciphertext: {0}")]
    InvalidCiphertext(String),

    /// KMS could not be reached
    #[error("KMS unavailable: {0}")]
    Unavailable(String),

    /// Any other KMS API error
    #[error("AWS KMS error: {0}")]
    Kms(String),

    /// KMS answered without the expected blob
    #[error("KMS response missing {0}")]
    MissingBlob(&'static str),
}

impl AwsKmsError {
    fn from_sdk<E, R>(err: &SdkError<E, R>, not_found: bool, bad_ciphertext: bool) -> Self
    where
        E: StdError + 'static,
        R: std::fmt::Debug,
    {
        let message = DisplayErrorContext(err).to_string();
        if not_found {
            Self::KeyNotFound(message)
        } else if bad_ciphertext {
            Self::InvalidCiphertext(message)
        } else if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)) {
            Self::Unavailable(message)
        } else {
            Self::Kms(message)
        }
    }

    fn from_encrypt<R: std::fmt::Debug>(err: &SdkError<EncryptError, R>) -> Self {
        let service = err.as_service_error();
        let not_found = service.is_some_and(|e| {
            e.is_not_found_exception() || e.is_disabled_exception()
        });
        Self::from_sdk(err, not_found, false)
    }

    fn from_decrypt<R: std::fmt::Debug>(err: &SdkError<DecryptError, R>) -> Self {
        let service = err.as_service_error();
        let not_found = service.is_some_and(|e| {
            e.is_not_found_exception() || e.is_disabled_exception()
        });
        let bad_ciphertext = service.is_some_and(|e| {
            e.is_invalid_ciphertext_exception() || e.is_incorrect_key_exception()
        });
        Self::from_sdk(err, not_found, bad_ciphertext)
    }

    fn into_wrap_error(self) -> KeyProviderError {
        match self {
            Self::KeyNotFound(msg) => KeyProviderError::KekNotFound(msg),
            Self::Unavailable(msg) => KeyProviderError::BackendUnavailable(msg),
            other => KeyProviderError::WrapFailed(other.to_string()),
        }
    }
}

impl From<AwsKmsError> for KeyProviderError {
    fn from(err: AwsKmsError) -> Self {
        match err {
            AwsKmsError::KeyNotFound(msg) => Self::KekNotFound(msg),
            AwsKmsError::Unavailable(msg) => Self::BackendUnavailable(msg),
            other => Self::UnwrapFailed(other.to_string()),
        }
    }
}

/// KEK resolver delegating wrap and unwrap to AWS KMS.
#[derive(Debug, Clone)]
pub struct AwsKmsResolver {
    client: KmsClient,
}

impl AwsKmsResolver {
    /// Creates a resolver from the default AWS configuration chain.
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self { client: KmsClient::new(&config) }
    }

    /// Creates a resolver over a preconfigured client.
    #[must_use]
    pub const fn from_client(client: KmsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KekResolver for AwsKmsResolver {
    async fn resolve_key(&self, kek_path: &str) -> Result<SecretVec<u8>, KeyProviderError> {
        Err(KeyProviderError::NotExportable(kek_path.to_string()))
    }

    #[instrument(skip(self, dek))]
    async fn wrap_dek(
        &self,
        kek_path: &str,
        dek: &SecretVec<u8>,
    ) -> Result<Vec<u8>, KeyProviderError> {
        let response = self
            .client
            .encrypt()
            .key_id(kek_path)
            .encryption_context(CONTEXT_KEY, kek_path)
            .plaintext(Blob::new(dek.expose_secret().clone()))
            .send()
            .await
            .map_err(|e| AwsKmsError::from_encrypt(&e).into_wrap_error())?;

        let blob = response
            .ciphertext_blob()
            .ok_or_else(|| AwsKmsError::MissingBlob("ciphertext").into_wrap_error())?;
        debug!(wrapped_len = blob.as_ref().len(), "wrapped DEK with KMS");
        Ok(blob.as_ref().to_vec())
    }

    #[instrument(skip(self, wrapped_dek))]
    async fn unwrap_dek(
        &self,
        kek_path: &str,
        wrapped_dek: &[u8],
    ) -> Result<SecretVec<u8>, KeyProviderError> {
        let response = self
            .client
            .decrypt()
            .key_id(kek_path)
            .encryption_context(CONTEXT_KEY, kek_path)
            .ciphertext_blob(Blob::new(wrapped_dek.to_vec()))
            .send()
            .await
            .map_err(|e| KeyProviderError::from(AwsKmsError::from_decrypt(&e)))?;

        let plaintext = response
            .plaintext()
            .ok_or_else(|| KeyProviderError::from(AwsKmsError::MissingBlob("plaintext")))?;
        Ok(SecretVec::new(plaintext.as_ref().to_vec()))
    }
}
