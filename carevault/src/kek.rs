//! Key-encryption key resolution.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretVec};

use crate::cipher::FieldCipher;
use crate::error::KeyProviderError;
use crate::token::{CipherToken, IV_SIZE};

/// Resolves KEK paths and wraps or unwraps DEKs under them.
///
/// Implementations must be thread-safe (`Send + Sync`) so one resolver can
/// serve concurrent requests.
///
/// Backends that can hand out raw key bytes (files, secret managers) only
/// implement [`resolve_key`](KekResolver::resolve_key); the default
/// [`wrap_dek`](KekResolver::wrap_dek) and [`unwrap_dek`](KekResolver::unwrap_dek)
/// then seal the DEK locally with AES-256-GCM. Backends that never release key
/// material (KMS) override both and return `NotExportable` from `resolve_key`.
///
/// Locally wrapped DEKs are laid out as `iv || ciphertext || tag`.
///
/// # Example
///
/// ```rust,ignore
/// use carevault::kek::KekResolver;
///
/// struct VaultResolver { /* secret manager client */ }
///
/// #[async_trait::async_trait]
/// impl KekResolver for VaultResolver {
///     async fn resolve_key(&self, kek_path: &str) -> Result<SecretVec<u8>, KeyProviderError> {
///         // fetch the 32-byte key stored at `kek_path`
///     }
/// }
/// ```
#[async_trait]
pub trait KekResolver: Send + Sync {
    /// Fetches the raw KEK stored at `kek_path`.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::KekNotFound` if nothing is stored at the
    /// path, or `KeyProviderError::BackendUnavailable` if the backend cannot
    /// be reached.
    async fn resolve_key(&self, kek_path: &str) -> Result<SecretVec<u8>, KeyProviderError>;

    /// Wraps (encrypts) a DEK under the KEK at `kek_path`.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors; returns `KeyProviderError::WrapFailed`
    /// if the KEK is unusable.
    async fn wrap_dek(
        &self,
        kek_path: &str,
        dek: &SecretVec<u8>,
    ) -> Result<Vec<u8>, KeyProviderError> {
        let kek = self.resolve_key(kek_path).await?;
        let cipher =
            FieldCipher::new(&kek).map_err(|e| KeyProviderError::WrapFailed(e.to_string()))?;
        let token = cipher
            .seal(dek.expose_secret())
            .map_err(|e| KeyProviderError::WrapFailed(e.to_string()))?;

        let sealed = token.sealed();
        let mut wrapped = Vec::with_capacity(IV_SIZE + sealed.len());
        wrapped.extend_from_slice(token.iv());
        wrapped.extend_from_slice(&sealed);
        Ok(wrapped)
    }

    /// Unwraps (decrypts) a DEK using the KEK at `kek_path`.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors; returns `KeyProviderError::UnwrapFailed`
    /// if the blob is malformed or was wrapped under another KEK.
    async fn unwrap_dek(
        &self,
        kek_path: &str,
        wrapped_dek: &[u8],
    ) -> Result<SecretVec<u8>, KeyProviderError> {
        if wrapped_dek.len() <= IV_SIZE {
            return Err(KeyProviderError::UnwrapFailed(format!(
                "wrapped DEK too short: {} bytes",
                wrapped_dek.len()
            )));
        }
        let kek = self.resolve_key(kek_path).await?;
        let cipher =
            FieldCipher::new(&kek).map_err(|e| KeyProviderError::UnwrapFailed(e.to_string()))?;

        let (iv, sealed) = wrapped_dek.split_at(IV_SIZE);
        let iv: [u8; IV_SIZE] = iv
            .try_into()
            .map_err(|_| KeyProviderError::UnwrapFailed("invalid IV".to_string()))?;
        let token = CipherToken::from_sealed(iv, sealed.to_vec())
            .map_err(|e| KeyProviderError::UnwrapFailed(e.to_string()))?;
        let dek = cipher.open(&token).map_err(|_| {
            KeyProviderError::UnwrapFailed(format!("authentication failed under KEK {kek_path}"))
        })?;
        Ok(SecretVec::new(dek))
    }
}

#[async_trait]
impl<T: KekResolver + ?Sized> KekResolver for std::sync::Arc<T> {
    async fn resolve_key(&self, kek_path: &str) -> Result<SecretVec<u8>, KeyProviderError> {
        (**self).resolve_key(kek_path).await
    }

    async fn wrap_dek(
        &self,
        kek_path: &str,
        dek: &SecretVec<u8>,
    ) -> Result<Vec<u8>, KeyProviderError> {
        (**self).wrap_dek(kek_path, dek).await
    }

    async fn unwrap_dek(
        &self,
        kek_path: &str,
        wrapped_dek: &[u8],
    ) -> Result<SecretVec<u8>, KeyProviderError> {
        (**self).unwrap_dek(kek_path, wrapped_dek).await
    }
}
