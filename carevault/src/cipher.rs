//! Symmetric field cipher.
//!
//! Encrypts one string value at a time with AES-256-GCM under a raw 32-byte
//! key and a fresh random IV, producing a [`CipherToken`] string. Structured
//! values are serialized to JSON by the caller before they get here.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use secrecy::{ExposeSecret, SecretVec};

use crate::error::Error;
use crate::kdf::DEK_SIZE;
use crate::token::{CipherToken, IV_SIZE};

/// AES-256-GCM cipher bound to one key.
///
/// Build one per record and reuse it for every field of that record.
///
/// # Example
///
/// ```
/// use carevault::cipher::FieldCipher;
/// use carevault::kdf::generate_dek;
///
/// let dek = generate_dek();
/// let cipher = FieldCipher::new(&dek).unwrap();
///
/// let token = cipher.encrypt("Penicillin").unwrap();
/// assert_eq!(cipher.decrypt(&token).unwrap(), "Penicillin");
/// ```
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Creates a cipher for the given key.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyLength` if the key is not 32 bytes.
    pub fn new(key: &SecretVec<u8>) -> Result<Self, Error> {
        Self::from_bytes(key.expose_secret())
    }

    pub(crate) fn from_bytes(key: &[u8]) -> Result<Self, Error> {
        if key.len() != DEK_SIZE {
            return Err(Error::InvalidKeyLength { expected: DEK_SIZE, actual: key.len() });
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Encryption(format!("invalid key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypts a string value into a token.
    ///
    /// Every call draws a new IV, so equal inputs give different tokens.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encryption` if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        self.seal(plaintext.as_bytes()).map(|token| token.to_string())
    }

    /// Decrypts a token back into the original string.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The token is malformed (`Error::MalformedToken`)
    /// - Authentication fails or the plaintext is not UTF-8 (`Error::Decryption`)
    pub fn decrypt(&self, token: &str) -> Result<String, Error> {
        let token = CipherToken::parse(token)?;
        let plaintext = self.open(&token)?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<CipherToken, Error> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| Error::Encryption(format!("AES-256-GCM encryption failed: {e}")))?;

        CipherToken::from_sealed(iv, sealed)
    }

    pub(crate) fn open(&self, token: &CipherToken) -> Result<Vec<u8>, Error> {
        self.cipher
            .decrypt(Nonce::from_slice(token.iv()), token.sealed().as_slice())
            .map_err(|_| {
                Error::Decryption("authentication failed: wrong key or corrupted data".to_string())
            })
    }
}

/// Encrypts a single field value under `key`.
///
/// # Errors
///
/// Returns `Error::InvalidKeyLength` for a key that is not 32 bytes, or
/// `Error::Encryption` if the AEAD operation fails.
pub fn encrypt_field(plaintext: &str, key: &SecretVec<u8>) -> Result<String, Error> {
    FieldCipher::new(key)?.encrypt(plaintext)
}

/// Decrypts a single field token under `key`.
///
/// # Errors
///
/// Returns `Error::MalformedToken` or `Error::Decryption`; see
/// [`FieldCipher::decrypt`].
pub fn decrypt_field(token: &str, key: &SecretVec<u8>) -> Result<String, Error> {
    FieldCipher::new(key)?.decrypt(token)
}
