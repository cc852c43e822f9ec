//! Tenant and resident scoping for storage paths.

use std::fmt;

use crate::error::{Error, Result};
use crate::schema::RecordKind;

fn check_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        return Err(Error::Config(format!("invalid {what}: {value:?}")));
    }
    Ok(())
}

/// Opaque provider identifier. Only used to scope storage paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the id is empty or contains `/`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        check_segment("tenant id", &id)?;
        Ok(Self(id))
    }

    /// Returns the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection holding this tenant's residents.
    #[must_use]
    pub fn residents_path(&self) -> String {
        format!("providers/{}/residents", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resident within a tenant; resolves every document path under it.
///
/// # Example
///
/// ```
/// use carevault::context::{ResidentContext, TenantId};
/// use carevault::schema::RecordKind;
///
/// let tenant = TenantId::new("clinic-7").unwrap();
/// let ctx = ResidentContext::new(tenant, "res-42").unwrap();
///
/// assert_eq!(ctx.resident_path(), "providers/clinic-7/residents/res-42");
/// assert_eq!(
///     ctx.record_path(RecordKind::Allergy, "a1").unwrap(),
///     "providers/clinic-7/residents/res-42/allergies/a1"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentContext {
    tenant: TenantId,
    resident_id: String,
}

impl ResidentContext {
    /// Creates a context for one resident.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the resident id is empty or contains `/`.
    pub fn new(tenant: TenantId, resident_id: impl Into<String>) -> Result<Self> {
        let resident_id = resident_id.into();
        check_segment("resident id", &resident_id)?;
        Ok(Self { tenant, resident_id })
    }

    /// Returns the tenant.
    #[must_use]
    pub const fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Returns the resident id.
    #[must_use]
    pub fn resident_id(&self) -> &str {
        &self.resident_id
    }

    /// Path of the resident document.
    #[must_use]
    pub fn resident_path(&self) -> String {
        format!("{}/{}", self.tenant.residents_path(), self.resident_id)
    }

    /// Path of a sub-record collection.
    #[must_use]
    pub fn collection_path(&self, kind: RecordKind) -> String {
        format!("{}/{}", self.resident_path(), kind.collection())
    }

    /// Path of one sub-record.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the record id is empty or contains `/`.
    pub fn record_path(&self, kind: RecordKind, record_id: &str) -> Result<String> {
        check_segment("record id", record_id)?;
        Ok(format!("{}/{record_id}", self.collection_path(kind)))
    }
}

impl fmt::Display for ResidentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.tenant, self.resident_id)
    }
}
