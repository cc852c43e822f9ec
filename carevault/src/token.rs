//! Ciphertext token format for encrypted fields.
//!
//! A token carries everything needed to decrypt one field except the key:
//! - Initialization vector
//! - Ciphertext
//! - Authentication tag
//!
//! Format:
//! ```text
//! base64(iv).base64(ciphertext).base64(tag)
//! ```
//! The `.` separator never appears in standard base64, so splitting is
//! unambiguous.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::Error;

/// IV size for AES-256-GCM (96 bits).
pub const IV_SIZE: usize = 12;

/// Authentication tag size for AES-256-GCM (128 bits).
pub const TAG_SIZE: usize = 16;

/// Separator between token parts.
pub const SEPARATOR: char = '.';

/// A parsed ciphertext token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherToken {
    iv: [u8; IV_SIZE],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_SIZE],
}

impl CipherToken {
    /// Creates a token from its parts.
    #[must_use]
    pub const fn new(iv: [u8; IV_SIZE], ciphertext: Vec<u8>, tag: [u8; TAG_SIZE]) -> Self {
        Self { iv, ciphertext, tag }
    }

    /// Splits AEAD output (`ciphertext || tag`) into a token.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encryption` if the sealed output is shorter than a tag.
    pub fn from_sealed(iv: [u8; IV_SIZE], mut sealed: Vec<u8>) -> Result<Self, Error> {
        if sealed.len() < TAG_SIZE {
            return Err(Error::Encryption(format!(
                "sealed output too short: {} bytes",
                sealed.len()
            )));
        }
        let tag_bytes = sealed.split_off(sealed.len() - TAG_SIZE);
        let tag: [u8; TAG_SIZE] = tag_bytes
            .try_into()
            .map_err(|_| Error::Encryption("invalid tag size".to_string()))?;
        Ok(Self { iv, ciphertext: sealed, tag })
    }

    /// Returns the IV.
    #[must_use]
    pub const fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Returns the ciphertext without the tag.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Returns the authentication tag.
    #[must_use]
    pub const fn tag(&self) -> &[u8; TAG_SIZE] {
        &self.tag
    }

    /// Reassembles `ciphertext || tag` for the AEAD decrypt call.
    #[must_use]
    pub fn sealed(&self) -> Vec<u8> {
        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);
        sealed
    }

    /// Parses a token string.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedToken` if:
    /// - The token does not have exactly three parts
    /// - A part is not valid base64
    /// - The IV or tag has the wrong length
    pub fn parse(token: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = token.split(SEPARATOR).collect();
        let [iv, ciphertext, tag] = parts.as_slice() else {
            return Err(Error::MalformedToken(format!(
                "expected 3 parts, found {}",
                parts.len()
            )));
        };

        let iv = decode_part("iv", iv)?;
        let ciphertext = decode_part("ciphertext", ciphertext)?;
        let tag = decode_part("tag", tag)?;

        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|v: Vec<u8>| {
            Error::MalformedToken(format!("iv must be {IV_SIZE} bytes, got {}", v.len()))
        })?;
        let tag: [u8; TAG_SIZE] = tag.try_into().map_err(|v: Vec<u8>| {
            Error::MalformedToken(format!("tag must be {TAG_SIZE} bytes, got {}", v.len()))
        })?;

        Ok(Self { iv, ciphertext, tag })
    }
}

fn decode_part(name: &str, part: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(part)
        .map_err(|e| Error::MalformedToken(format!("{name} is not valid base64: {e}")))
}

impl fmt::Display for CipherToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            STANDARD.encode(self.iv),
            STANDARD.encode(&self.ciphertext),
            STANDARD.encode(self.tag)
        )
    }
}
