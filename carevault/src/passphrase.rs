//! Passphrase-derived field cipher.
//!
//! Used where a shared secret, not a wrapped DEK, protects a value (the
//! emergency-contact lookup page). Each call draws a new salt and IV, derives
//! the key with PBKDF2 and seals with AES-256-GCM.
//!
//! Token format:
//! ```text
//! hex(salt).hex(iv).base64(ciphertext || tag)
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::cipher::FieldCipher;
use crate::error::Error;
use crate::kdf::{derive_passphrase_key, generate_salt, SALT_SIZE};
use crate::token::{CipherToken, IV_SIZE, SEPARATOR};

/// Encrypts `plaintext` under a key derived from `secret`.
///
/// # Errors
///
/// Returns `Error::Config` for an empty secret, or `Error::Encryption` if
/// sealing fails.
pub fn encrypt_with_passphrase(plaintext: &str, secret: &str) -> Result<String, Error> {
    if secret.is_empty() {
        return Err(Error::Config("passphrase must not be empty".to_string()));
    }

    let salt = generate_salt();
    let key = derive_passphrase_key(secret.as_bytes(), &salt);
    let token = FieldCipher::new(&key)?.seal(plaintext.as_bytes())?;

    Ok(format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}",
        hex::encode(salt),
        hex::encode(token.iv()),
        STANDARD.encode(token.sealed())
    ))
}

/// Decrypts a passphrase token produced by [`encrypt_with_passphrase`].
///
/// # Errors
///
/// Returns error if:
/// - The secret is empty (`Error::Config`)
/// - The token is not `salt.iv.data` or has bad encodings (`Error::MalformedToken`)
/// - The secret is wrong or the data corrupted (`Error::Decryption`)
pub fn decrypt_with_passphrase(token: &str, secret: &str) -> Result<String, Error> {
    if secret.is_empty() {
        return Err(Error::Config("passphrase must not be empty".to_string()));
    }

    let parts: Vec<&str> = token.split(SEPARATOR).collect();
    let [salt, iv, data] = parts.as_slice() else {
        return Err(Error::MalformedToken(format!("expected 3 parts, found {}", parts.len())));
    };

    let salt = hex::decode(salt)
        .map_err(|e| Error::MalformedToken(format!("salt is not valid hex: {e}")))?;
    if salt.len() != SALT_SIZE {
        return Err(Error::MalformedToken(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    let iv: [u8; IV_SIZE] = hex::decode(iv)
        .map_err(|e| Error::MalformedToken(format!("iv is not valid hex: {e}")))?
        .try_into()
        .map_err(|_| Error::MalformedToken(format!("iv must be {IV_SIZE} bytes")))?;
    let sealed = STANDARD
        .decode(data)
        .map_err(|e| Error::MalformedToken(format!("data is not valid base64: {e}")))?;
    let token = CipherToken::from_sealed(iv, sealed).map_err(|_| {
        Error::MalformedToken("data shorter than the authentication tag".to_string())
    })?;

    let key = derive_passphrase_key(secret.as_bytes(), &salt);
    let plaintext = FieldCipher::new(&key)?.open(&token)?;
    String::from_utf8(plaintext)
        .map_err(|_| Error::Decryption("plaintext is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_round_trip() {
        let token = encrypt_with_passphrase("+234 803 555 0100", "s3cret").unwrap();
        assert_eq!(token.split(SEPARATOR).count(), 3);

        let decrypted = decrypt_with_passphrase(&token, "s3cret").unwrap();
        assert_eq!(decrypted, "+234 803 555 0100");
    }

    #[test]
    fn test_passphrase_fresh_salt_per_call() {
        let token1 = encrypt_with_passphrase("same", "s3cret").unwrap();
        let token2 = encrypt_with_passphrase("same", "s3cret").unwrap();

        let salt1 = token1.split(SEPARATOR).next().unwrap();
        let salt2 = token2.split(SEPARATOR).next().unwrap();
        assert_ne!(salt1, salt2);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let token = encrypt_with_passphrase("value", "right").unwrap();
        let result = decrypt_with_passphrase(&token, "wrong");
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_malformed_passphrase_token_is_rejected() {
        let result = decrypt_with_passphrase("plain text value", "s3cret");
        assert!(matches!(result, Err(Error::MalformedToken(_))));

        let result = decrypt_with_passphrase("zz.zz.zz", "s3cret");
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(matches!(encrypt_with_passphrase("value", ""), Err(Error::Config(_))));
        assert!(matches!(decrypt_with_passphrase("a.b.c", ""), Err(Error::Config(_))));
    }
}
