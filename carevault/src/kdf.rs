//! Key material generation and derivation.
//!
//! Random Data Encryption Keys (DEKs) for envelope encryption, and
//! PBKDF2-HMAC-SHA256 derivation for the passphrase cipher.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use secrecy::SecretVec;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Standard DEK size in bytes (256 bits).
pub const DEK_SIZE: usize = 32;

/// PBKDF2 iteration count for passphrase-derived keys.
pub const PBKDF2_ROUNDS: u32 = 10_000;

/// Salt size for passphrase-derived keys (128 bits).
pub const SALT_SIZE: usize = 16;

/// Generates a random DEK for envelope encryption.
///
/// This DEK must be wrapped (encrypted) with a KEK before storage.
///
/// # Example
///
/// ```
/// use carevault::kdf::generate_dek;
/// use secrecy::ExposeSecret;
///
/// let dek = generate_dek();
/// assert_eq!(dek.expose_secret().len(), 32);
/// ```
#[must_use]
pub fn generate_dek() -> SecretVec<u8> {
    let mut dek = vec![0u8; DEK_SIZE];
    OsRng.fill_bytes(&mut dek);
    SecretVec::new(dek)
}

/// Generates a random salt for passphrase key derivation.
#[must_use]
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derives a 32-byte key from a passphrase and salt.
///
/// The same passphrase and salt always give the same key.
#[must_use]
pub fn derive_passphrase_key(passphrase: &[u8], salt: &[u8]) -> SecretVec<u8> {
    let mut key = Zeroizing::new([0u8; DEK_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, PBKDF2_ROUNDS, key.as_mut());
    SecretVec::new(key.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_generate_dek_size() {
        let dek = generate_dek();
        assert_eq!(dek.expose_secret().len(), DEK_SIZE);
    }

    #[test]
    fn test_generate_dek_randomness() {
        let dek1 = generate_dek();
        let dek2 = generate_dek();

        // Two random DEKs should be different
        assert_ne!(dek1.expose_secret(), dek2.expose_secret());
    }

    #[test]
    fn test_derive_passphrase_key_deterministic() {
        let salt = [3u8; SALT_SIZE];
        let key1 = derive_passphrase_key(b"correct horse", &salt);
        let key2 = derive_passphrase_key(b"correct horse", &salt);

        assert_eq!(key1.expose_secret(), key2.expose_secret());
        assert_eq!(key1.expose_secret().len(), DEK_SIZE);
    }

    #[test]
    fn test_derive_passphrase_key_salt_separation() {
        let key1 = derive_passphrase_key(b"correct horse", &[1u8; SALT_SIZE]);
        let key2 = derive_passphrase_key(b"correct horse", &[2u8; SALT_SIZE]);

        assert_ne!(key1.expose_secret(), key2.expose_secret());
    }
}
