//! Data-encryption key lifecycle.
//!
//! A DEK is created once per resident per domain, stored only in wrapped
//! form and unwrapped on every read. The manager keeps no cache.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretVec};
use tracing::{debug, instrument};

use crate::domain::{Domain, KekPaths};
use crate::error::{Error, Result};
use crate::kdf::{generate_dek, DEK_SIZE};
use crate::kek::KekResolver;

/// A DEK encrypted under a KEK, safe to persist.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedDek(Vec<u8>);

impl WrappedDek {
    /// Wraps raw bytes returned by a resolver.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the wrapped bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encodes for storage in a document field.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Decodes a stored wrapped DEK.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyUnwrap` if the string is not valid base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(|e| Error::KeyUnwrap(format!("wrapped DEK is not valid base64: {e}")))
    }
}

impl fmt::Debug for WrappedDek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappedDek({} bytes)", self.0.len())
    }
}

/// A DEK in both plaintext and wrapped form.
///
/// The plaintext half is zeroized on drop and must never be persisted.
pub struct DataKey {
    domain: Domain,
    plaintext: SecretVec<u8>,
    wrapped: WrappedDek,
}

impl DataKey {
    /// Reassembles a data key from an unwrapped DEK and its stored form.
    #[must_use]
    pub const fn from_parts(domain: Domain, plaintext: SecretVec<u8>, wrapped: WrappedDek) -> Self {
        Self { domain, plaintext, wrapped }
    }

    /// Domain whose KEK wraps this DEK.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Plaintext DEK for field encryption.
    #[must_use]
    pub const fn plaintext(&self) -> &SecretVec<u8> {
        &self.plaintext
    }

    /// Wrapped DEK for storage.
    #[must_use]
    pub const fn wrapped(&self) -> &WrappedDek {
        &self.wrapped
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("domain", &self.domain)
            .field("plaintext", &"[REDACTED]")
            .field("wrapped", &self.wrapped)
            .finish()
    }
}

/// Generates and unwraps DEKs through a [`KekResolver`].
///
/// # Example
///
/// ```rust,ignore
/// use carevault::prelude::*;
///
/// let manager = DekManager::new(resolver, KekPaths::from_env());
/// let key = manager.generate_data_key(Domain::Clinical).await?;
/// let again = manager.decrypt_data_key(key.wrapped(), Domain::Clinical).await?;
/// ```
pub struct DekManager<R> {
    resolver: R,
    paths: KekPaths,
}

impl<R: KekResolver> DekManager<R> {
    /// Creates a manager over a resolver and its per-domain KEK paths.
    #[must_use]
    pub const fn new(resolver: R, paths: KekPaths) -> Self {
        Self { resolver, paths }
    }

    /// Returns the configured KEK paths.
    #[must_use]
    pub const fn paths(&self) -> &KekPaths {
        &self.paths
    }

    /// Returns the underlying resolver.
    #[must_use]
    pub const fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Generates a fresh DEK and wraps it under the domain's KEK.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyResolution` if the domain has no KEK path or the
    /// KEK cannot be resolved.
    #[instrument(skip(self))]
    pub async fn generate_data_key(&self, domain: Domain) -> Result<DataKey> {
        let path = self.paths.path(domain)?;
        let plaintext = generate_dek();
        let wrapped = self.resolver.wrap_dek(path, &plaintext).await?;
        debug!(wrapped_len = wrapped.len(), "generated data key");

        Ok(DataKey { domain, plaintext, wrapped: WrappedDek(wrapped) })
    }

    /// Unwraps a stored DEK with the domain's KEK.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The domain's KEK cannot be resolved (`Error::KeyResolution`)
    /// - The blob is malformed, wrapped under another KEK, or does not
    ///   unwrap to a 32-byte key (`Error::KeyUnwrap`)
    #[instrument(skip(self, wrapped))]
    pub async fn decrypt_data_key(
        &self,
        wrapped: &WrappedDek,
        domain: Domain,
    ) -> Result<SecretVec<u8>> {
        let path = self.paths.path(domain)?;
        let dek = self.resolver.unwrap_dek(path, wrapped.as_bytes()).await?;

        let len = dek.expose_secret().len();
        if len != DEK_SIZE {
            return Err(Error::KeyUnwrap(format!(
                "unwrapped DEK is {len} bytes, expected {DEK_SIZE}"
            )));
        }
        Ok(dek)
    }

    /// Decodes a stored base64 wrapped DEK and unwraps it into a [`DataKey`].
    ///
    /// # Errors
    ///
    /// See [`DekManager::decrypt_data_key`]; bad base64 is `Error::KeyUnwrap`.
    pub async fn open_data_key(&self, encoded: &str, domain: Domain) -> Result<DataKey> {
        let wrapped = WrappedDek::from_base64(encoded)?;
        let plaintext = self.decrypt_data_key(&wrapped, domain).await?;
        Ok(DataKey::from_parts(domain, plaintext, wrapped))
    }
}
