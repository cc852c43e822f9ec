//! # `CareVault`
//!
//! Field-level envelope encryption for resident health and billing records.
//!
//! Every sensitive field is sealed with AES-256-GCM under a per-resident
//! data encryption key (DEK). DEKs are wrapped by one of four key encryption
//! keys (KEKs), one per data domain, so a caller holding only the clinical
//! KEK can never read financial data.
//!
//! ## Features
//!
//! - AES-256-GCM field cipher with `iv.ciphertext.tag` tokens
//! - Envelope encryption with per-domain KEKs and wrapped DEKs
//! - Schema-driven record transformer for 22 sub-record kinds
//! - Resident vault with role-gated reads and atomic collection batches
//! - Passphrase-based cipher for exports
//!
//! ## Example
//!
//! ```rust,ignore
//! use carevault::prelude::*;
//! use carevault_key_file::FileKeyResolver;
//!
//! let resolver = FileKeyResolver::new("./keys")?;
//! let keys = DekManager::new(resolver, KekPaths::from_env());
//! let vault = ResidentVault::new(MemoryStore::new(), keys);
//! let tenant = TenantId::new("clinic-7")?;
//!
//! let resident_id = vault.create_resident(&tenant, &resident).await?;
//! let allergy_id =
//!     vault.write_record(&tenant, &resident_id, RecordKind::Allergy, &allergy).await?;
//! let stored = vault.read_record(&tenant, &resident_id, RecordKind::Allergy, &allergy_id).await?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod boundary;
pub mod cipher;
pub mod context;
pub mod dek;
pub mod domain;
pub mod error;
pub mod kdf;
pub mod kek;
pub mod passphrase;
pub mod records;
pub mod schema;
pub mod service;
pub mod store;
pub mod token;
pub mod transform;

/// A flat record: field name to JSON value.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::boundary::ActionResult;
    pub use crate::cipher::{decrypt_field, encrypt_field, FieldCipher};
    pub use crate::context::{ResidentContext, TenantId};
    pub use crate::dek::{DataKey, DekManager, WrappedDek};
    pub use crate::domain::{Domain, KekPaths};
    pub use crate::error::{Error, KeyProviderError, Result};
    pub use crate::kek::KekResolver;
    pub use crate::passphrase::{decrypt_with_passphrase, encrypt_with_passphrase};
    pub use crate::records::{decrypt_record, encrypt_record, Record};
    pub use crate::schema::RecordKind;
    pub use crate::service::{ChangeSummary, CollectionChanges, ResidentVault, Role};
    pub use crate::store::{DocumentStore, MemoryStore, WriteBatch};
    pub use crate::transform::{to_encrypted_record, to_plaintext_record};
    pub use crate::FieldMap;
}
