//! Sensitivity domains and their KEK configuration.
//!
//! Every protected field belongs to exactly one domain, and each domain is
//! wrapped under its own key-encryption key. The domain is always taken from
//! the record kind, never from caller input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, KeyProviderError};

/// Sensitivity partition selecting which KEK protects a DEK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Identity and demographic basics
    General,
    /// Addresses, phone numbers, emergency contacts
    Contact,
    /// Medical records
    Clinical,
    /// Billing, claims, coverage
    Financial,
}

impl Domain {
    /// All domains, in the order their DEKs are created for a new resident.
    pub const ALL: [Self; 4] = [Self::General, Self::Contact, Self::Clinical, Self::Financial];

    /// Lowercase name used in field names and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Contact => "contact",
            Self::Clinical => "clinical",
            Self::Financial => "financial",
        }
    }

    /// Resident document field holding this domain's wrapped DEK.
    ///
    /// ```
    /// use carevault::domain::Domain;
    ///
    /// assert_eq!(Domain::Clinical.dek_field(), "encrypted_dek_clinical");
    /// ```
    #[must_use]
    pub const fn dek_field(self) -> &'static str {
        match self {
            Self::General => "encrypted_dek_general",
            Self::Contact => "encrypted_dek_contact",
            Self::Clinical => "encrypted_dek_clinical",
            Self::Financial => "encrypted_dek_financial",
        }
    }

    /// Environment variable naming this domain's KEK path.
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::General => "KEK_GENERAL_PATH",
            Self::Contact => "KEK_CONTACT_PATH",
            Self::Clinical => "KEK_CLINICAL_PATH",
            Self::Financial => "KEK_FINANCIAL_PATH",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown domain: {s}")))
    }
}

/// KEK path per domain.
///
/// A path is an opaque string interpreted by the [`KekResolver`] in use: a
/// key file name for the file backend, a key id or alias for KMS.
///
/// [`KekResolver`]: crate::kek::KekResolver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KekPaths {
    /// KEK path for the general domain
    pub general: Option<String>,
    /// KEK path for the contact domain
    pub contact: Option<String>,
    /// KEK path for the clinical domain
    pub clinical: Option<String>,
    /// KEK path for the financial domain
    pub financial: Option<String>,
}

impl KekPaths {
    /// Reads the four `KEK_*_PATH` environment variables.
    ///
    /// A missing or empty variable is logged as a warning but is not an
    /// error here; use [`KekPaths::validate`] to fail fast at startup.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut paths = Self::default();
        for domain in Domain::ALL {
            let value = lookup(domain.env_var()).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                tracing::warn!(
                    domain = %domain,
                    var = domain.env_var(),
                    "KEK path is not set; {domain} data cannot be encrypted or decrypted"
                );
            }
            *paths.slot_mut(domain) = value;
        }
        paths
    }

    /// Builder-style setter for one domain's path.
    #[must_use]
    pub fn with(mut self, domain: Domain, path: impl Into<String>) -> Self {
        *self.slot_mut(domain) = Some(path.into());
        self
    }

    /// Returns the configured path for a domain.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::PathNotConfigured` if the path is unset.
    pub fn path(&self, domain: Domain) -> Result<&str, KeyProviderError> {
        self.slot(domain).as_deref().ok_or(KeyProviderError::PathNotConfigured(domain))
    }

    /// Domains with no configured path.
    #[must_use]
    pub fn missing(&self) -> Vec<Domain> {
        Domain::ALL.into_iter().filter(|d| self.slot(*d).is_none()).collect()
    }

    /// Checks that every domain has a path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` listing every domain without a path.
    pub fn validate(&self) -> Result<(), Error> {
        let missing = self.missing();
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter().map(|d| d.env_var()).collect();
        Err(Error::Config(format!("missing KEK paths: {}", names.join(", "))))
    }

    const fn slot(&self, domain: Domain) -> &Option<String> {
        match domain {
            Domain::General => &self.general,
            Domain::Contact => &self.contact,
            Domain::Clinical => &self.clinical,
            Domain::Financial => &self.financial,
        }
    }

    fn slot_mut(&mut self, domain: Domain) -> &mut Option<String> {
        match domain {
            Domain::General => &mut self.general,
            Domain::Contact => &mut self.contact,
            Domain::Clinical => &mut self.clinical,
            Domain::Financial => &mut self.financial,
        }
    }
}
