//! Resident vault: the read and write paths over storage.
//!
//! Ties the DEK manager, the transformer and a [`DocumentStore`] together.
//! Every call resolves keys afresh; nothing plaintext is cached.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use secrecy::SecretVec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cipher::FieldCipher;
use crate::context::{ResidentContext, TenantId};
use crate::dek::{DataKey, DekManager};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::kek::KekResolver;
use crate::schema::{all_resident_fields, resident_fields, type_name, RecordKind};
use crate::store::{DocumentStore, WriteBatch};
use crate::transform::{
    check_encrypted_shape, copy_clear, decrypt_fields, encrypt_fields, to_encrypted_record,
    to_plaintext_record, validate_plaintext, wrapped_dek,
};
use crate::FieldMap;

/// Caller role, deciding which resident domains may be decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access
    Admin,
    /// Clinical staff
    Clinician,
    /// Care staff
    Caregiver,
    /// Read-only basics
    Viewer,
}

impl Role {
    /// True if this role may read the given domain.
    #[must_use]
    pub const fn can_read(self, domain: Domain) -> bool {
        match domain {
            Domain::General => true,
            Domain::Contact => matches!(self, Self::Admin | Self::Clinician | Self::Caregiver),
            Domain::Clinical => matches!(self, Self::Admin | Self::Clinician),
            Domain::Financial => matches!(self, Self::Admin),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Admin => "admin",
            Self::Clinician => "clinician",
            Self::Caregiver => "caregiver",
            Self::Viewer => "viewer",
        })
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Self::Admin),
            "clinician" => Ok(Self::Clinician),
            "caregiver" => Ok(Self::Caregiver),
            "viewer" => Ok(Self::Viewer),
            other => Err(Error::Config(format!("unknown role: {other}"))),
        }
    }
}

/// Mutation of one sub-record collection.
///
/// Upserts without an `id` are created, upserts with an `id` replace the
/// stored record, and every id in `deletions` is removed. An id may appear
/// at most once among the upserts and may not be both upserted and deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionChanges {
    /// Records to create or replace
    pub upserts: Vec<FieldMap>,
    /// Ids of records to delete
    pub deletions: Vec<String>,
}

/// Ids touched by [`ResidentVault::apply_changes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Ids of newly created records
    pub created: Vec<String>,
    /// Ids of replaced records
    pub updated: Vec<String>,
    /// Ids of deleted records
    pub deleted: Vec<String>,
}

fn record_id(record: &FieldMap) -> Result<Option<String>> {
    match record.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(other) => Err(Error::SchemaViolation(format!(
            "`id` must be a string, found {}",
            type_name(other)
        ))),
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Encrypting document service for residents and their sub-records.
///
/// # Example
///
/// ```rust,ignore
/// use carevault::prelude::*;
///
/// let vault = ResidentVault::new(MemoryStore::new(), DekManager::new(resolver, paths));
/// let tenant = TenantId::new("clinic-7")?;
///
/// let resident_id = vault.create_resident(&tenant, &resident).await?;
/// let allergy_id =
///     vault.write_record(&tenant, &resident_id, RecordKind::Allergy, &allergy).await?;
/// let visible = vault.read_resident(&tenant, &resident_id, &[Role::Caregiver]).await?;
/// ```
pub struct ResidentVault<S, R> {
    store: S,
    keys: DekManager<R>,
}

impl<S: DocumentStore, R: KekResolver> ResidentVault<S, R> {
    /// Creates a vault over a store and a DEK manager.
    #[must_use]
    pub const fn new(store: S, keys: DekManager<R>) -> Self {
        Self { store, keys }
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the DEK manager.
    #[must_use]
    pub const fn keys(&self) -> &DekManager<R> {
        &self.keys
    }

    async fn fetch(&self, path: &str, what: impl FnOnce() -> String) -> Result<FieldMap> {
        self.store.get(path).await?.ok_or_else(|| Error::NotFound(what()))
    }

    /// Creates a resident document with one fresh DEK per domain.
    ///
    /// Uses the record's `id` when present, otherwise a new UUID. An
    /// existing resident is never replaced.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - A resident with the same id exists (`Error::AlreadyExists`)
    /// - The resident does not match the resident schema (`Error::SchemaViolation`)
    /// - Any domain's KEK cannot be resolved (`Error::KeyResolution`)
    /// - The store fails (`Error::Storage`)
    #[instrument(skip(self, resident), fields(tenant = %tenant))]
    pub async fn create_resident(&self, tenant: &TenantId, resident: &FieldMap) -> Result<String> {
        let fields = all_resident_fields();
        validate_plaintext(&fields, resident)?;

        let resident_id = record_id(resident)?.unwrap_or_else(new_id);
        let ctx = ResidentContext::new(tenant.clone(), resident_id.as_str())?;

        let mut doc = FieldMap::new();
        copy_clear(&fields, resident, &mut doc);
        doc.remove("id");

        for domain in Domain::ALL {
            let key = self.keys.generate_data_key(domain).await?;
            let cipher = FieldCipher::new(key.plaintext())?;
            encrypt_fields(resident_fields(domain), resident, &cipher, &mut doc)?;
            doc.insert(domain.dek_field().to_string(), Value::String(key.wrapped().to_base64()));
        }

        if !self.store.create(&ctx.resident_path(), doc).await? {
            return Err(Error::AlreadyExists(format!("resident {resident_id}")));
        }
        info!(resident_id = %resident_id, "created resident");
        Ok(resident_id)
    }

    /// Reads a resident, decrypting only the domains `roles` may see.
    ///
    /// Fields of other domains are left out of the result. A readable
    /// domain whose DEK cannot be unwrapped fails the whole read.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The resident does not exist (`Error::NotFound`)
    /// - A readable domain's DEK or field cannot be decrypted
    #[instrument(skip(self, roles), fields(tenant = %tenant))]
    pub async fn read_resident(
        &self,
        tenant: &TenantId,
        resident_id: &str,
        roles: &[Role],
    ) -> Result<FieldMap> {
        let ctx = ResidentContext::new(tenant.clone(), resident_id)?;
        let doc = self.fetch(&ctx.resident_path(), || format!("resident {resident_id}")).await?;

        let fields = all_resident_fields();
        let dek_fields = Domain::ALL.map(Domain::dek_field);
        check_encrypted_shape(&fields, &doc, &dek_fields)?;

        let mut resident = FieldMap::new();
        copy_clear(&fields, &doc, &mut resident);
        resident.insert("id".to_string(), Value::String(resident_id.to_string()));

        for domain in Domain::ALL {
            let domain_fields = resident_fields(domain);
            if domain_fields.is_empty() || !roles.iter().any(|role| role.can_read(domain)) {
                continue;
            }
            let encoded = match doc.get(domain.dek_field()) {
                Some(Value::String(encoded)) => encoded,
                _ => {
                    return Err(Error::SchemaViolation(format!(
                        "resident {resident_id} has no `{}`",
                        domain.dek_field()
                    )));
                }
            };
            let key = self.keys.open_data_key(encoded, domain).await?;
            let cipher = FieldCipher::new(key.plaintext())?;
            decrypt_fields(domain_fields, &doc, &cipher, &mut resident)?;
        }

        debug!(fields = resident.len(), "read resident");
        Ok(resident)
    }

    /// Returns the resident's DEK for `domain`, creating it on first use.
    ///
    /// A new DEK is published with a create-if-absent write. If another
    /// writer published first, its DEK is unwrapped and returned instead,
    /// so every caller ends up with the same key.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the resident does not exist, or any key
    /// resolution or unwrap error.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn domain_key(
        &self,
        tenant: &TenantId,
        resident_id: &str,
        domain: Domain,
    ) -> Result<DataKey> {
        let ctx = ResidentContext::new(tenant.clone(), resident_id)?;
        let path = ctx.resident_path();
        let not_found = || format!("resident {resident_id}");

        let doc = self.fetch(&path, not_found).await?;
        if let Some(Value::String(encoded)) = doc.get(domain.dek_field()) {
            return self.keys.open_data_key(encoded, domain).await;
        }

        let key = self.keys.generate_data_key(domain).await?;
        let encoded = Value::String(key.wrapped().to_base64());
        let published =
            self.store.set_field_if_absent(&path, domain.dek_field(), encoded).await?;
        if published {
            info!(%domain, "published new data key");
            return Ok(key);
        }

        warn!(%domain, "lost data key race, adopting stored key");
        let doc = self.fetch(&path, not_found).await?;
        match doc.get(domain.dek_field()) {
            Some(Value::String(encoded)) => self.keys.open_data_key(encoded, domain).await,
            _ => Err(Error::KeyUnwrap(format!("no {domain} data key on resident {resident_id}"))),
        }
    }

    /// Encrypts and stores one sub-record, returning its id.
    ///
    /// A record with an `id` replaces the stored record; otherwise a new
    /// UUID is assigned.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the resident does not exist, plus every
    /// error of [`to_encrypted_record`].
    #[instrument(skip(self, record), fields(tenant = %tenant, %kind))]
    pub async fn write_record(
        &self,
        tenant: &TenantId,
        resident_id: &str,
        kind: RecordKind,
        record: &FieldMap,
    ) -> Result<String> {
        let ctx = ResidentContext::new(tenant.clone(), resident_id)?;
        let id = record_id(record)?.unwrap_or_else(new_id);
        let path = ctx.record_path(kind, &id)?;

        let key = self.domain_key(tenant, resident_id, kind.domain()).await?;
        let mut stored = to_encrypted_record(kind, record, &key)?;
        stored.remove("id");

        self.store.set(&path, stored, false).await?;
        debug!(record_id = %id, "stored record");
        Ok(id)
    }

    async fn open_record(&self, kind: RecordKind, id: &str, stored: &FieldMap) -> Result<FieldMap> {
        let wrapped = wrapped_dek(stored)?;
        let dek: SecretVec<u8> = self.keys.decrypt_data_key(&wrapped, kind.domain()).await?;
        let mut record = to_plaintext_record(kind, stored, &dek)?;
        record.insert("id".to_string(), Value::String(id.to_string()));
        Ok(record)
    }

    /// Reads and decrypts one sub-record.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the record does not exist. The record's
    /// DEK is unwrapped before any field is touched, so a KEK mismatch
    /// fails with `Error::KeyUnwrap` first.
    #[instrument(skip(self), fields(tenant = %tenant, %kind))]
    pub async fn read_record(
        &self,
        tenant: &TenantId,
        resident_id: &str,
        kind: RecordKind,
        record_id: &str,
    ) -> Result<FieldMap> {
        let ctx = ResidentContext::new(tenant.clone(), resident_id)?;
        let path = ctx.record_path(kind, record_id)?;
        let stored = self.fetch(&path, || format!("{kind} {record_id}")).await?;
        self.open_record(kind, record_id, &stored).await
    }

    /// Reads and decrypts every record in a collection, ordered by id.
    ///
    /// # Errors
    ///
    /// Fails on the first record that cannot be decrypted.
    #[instrument(skip(self), fields(tenant = %tenant, %kind))]
    pub async fn list_records(
        &self,
        tenant: &TenantId,
        resident_id: &str,
        kind: RecordKind,
    ) -> Result<Vec<FieldMap>> {
        let ctx = ResidentContext::new(tenant.clone(), resident_id)?;
        let mut stored = self.store.list(&ctx.collection_path(kind)).await?;
        stored.sort_by(|a, b| a.0.cmp(&b.0));

        let mut records = Vec::with_capacity(stored.len());
        for (id, doc) in &stored {
            records.push(self.open_record(kind, id, doc).await?);
        }
        Ok(records)
    }

    /// Applies creates, replacements and deletions to one collection as a
    /// single atomic batch.
    ///
    /// Deletions need no key. Nothing is written if any record fails to
    /// encrypt or the store rejects the batch.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaViolation` if an id is upserted twice or both
    /// upserted and deleted, plus every error of
    /// [`ResidentVault::write_record`].
    #[instrument(skip(self, changes), fields(tenant = %tenant, %kind))]
    pub async fn apply_changes(
        &self,
        tenant: &TenantId,
        resident_id: &str,
        kind: RecordKind,
        changes: &CollectionChanges,
    ) -> Result<ChangeSummary> {
        let ctx = ResidentContext::new(tenant.clone(), resident_id)?;
        let deletions: HashSet<&str> = changes.deletions.iter().map(String::as_str).collect();

        let mut upserted = HashSet::new();
        let mut summary = ChangeSummary::default();
        let mut batch = WriteBatch::new();

        if !changes.upserts.is_empty() {
            let key = self.domain_key(tenant, resident_id, kind.domain()).await?;
            for record in &changes.upserts {
                let id = match record_id(record)? {
                    Some(id) if deletions.contains(id.as_str()) => {
                        return Err(Error::SchemaViolation(format!(
                            "{kind} {id} is both updated and deleted"
                        )));
                    }
                    Some(id) if !upserted.insert(id.clone()) => {
                        return Err(Error::SchemaViolation(format!(
                            "{kind} {id} is upserted more than once"
                        )));
                    }
                    Some(id) => {
                        summary.updated.push(id.clone());
                        id
                    }
                    None => {
                        let id = new_id();
                        summary.created.push(id.clone());
                        id
                    }
                };
                let mut stored = to_encrypted_record(kind, record, &key)?;
                stored.remove("id");
                batch.set(ctx.record_path(kind, &id)?, stored, false);
            }
        }

        for id in &changes.deletions {
            batch.delete(ctx.record_path(kind, id)?);
            summary.deleted.push(id.clone());
        }

        if batch.is_empty() {
            return Ok(summary);
        }
        self.store.commit(batch).await?;
        info!(
            created = summary.created.len(),
            updated = summary.updated.len(),
            deleted = summary.deleted.len(),
            "applied collection changes"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kek::testing::MockKekResolver;
    use crate::store::MemoryStore;
    use serde_json::json;

    type Vault = ResidentVault<MemoryStore, MockKekResolver>;

    fn vault() -> Vault {
        ResidentVault::new(
            MemoryStore::new(),
            DekManager::new(MockKekResolver::new(), MockKekResolver::paths()),
        )
    }

    fn tenant() -> TenantId {
        TenantId::new("clinic-1").unwrap()
    }

    fn map(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn resident() -> FieldMap {
        map(json!({
            "facility_id": "fac-1",
            "created_at": "2024-01-05T09:00:00Z",
            "resident_name": "Chinwe Okafor",
            "room_no": "12B",
            "cell_phone": "+234 802 000 1111",
            "dob": "1941-07-19",
            "pcp": "Dr. Bello",
        }))
    }

    #[test]
    fn test_role_matrix() {
        assert!(Role::Viewer.can_read(Domain::General));
        assert!(!Role::Viewer.can_read(Domain::Contact));
        assert!(Role::Caregiver.can_read(Domain::Contact));
        assert!(!Role::Caregiver.can_read(Domain::Clinical));
        assert!(Role::Clinician.can_read(Domain::Clinical));
        assert!(!Role::Clinician.can_read(Domain::Financial));
        assert!(Role::Admin.can_read(Domain::Financial));
        assert_eq!("caregiver".parse::<Role>().unwrap(), Role::Caregiver);
    }

    #[tokio::test]
    async fn test_create_resident_layout() {
        let vault = vault();
        let id = vault.create_resident(&tenant(), &resident()).await.unwrap();

        let path = format!("providers/clinic-1/residents/{id}");
        let doc = vault.store().get(&path).await.unwrap().unwrap();
        assert_eq!(doc["facility_id"], "fac-1");
        assert_eq!(doc["created_at"], "2024-01-05T09:00:00Z");
        for domain in Domain::ALL {
            assert!(doc[domain.dek_field()].is_string());
        }
        assert!(doc.contains_key("encrypted_resident_name"));
        assert!(doc.contains_key("encrypted_pcp"));
        assert!(!doc.contains_key("resident_name"));
        assert!(!doc.contains_key("encrypted_gender"));
    }

    #[tokio::test]
    async fn test_create_resident_twice_keeps_first() {
        let vault = vault();
        let mut first = resident();
        first.insert("id".to_string(), json!("r-1"));
        vault.create_resident(&tenant(), &first).await.unwrap();
        let path = "providers/clinic-1/residents/r-1";
        let before = vault.store().get(path).await.unwrap().unwrap();

        let mut second = first.clone();
        second.insert("resident_name".to_string(), json!("Someone Else"));
        let result = vault.create_resident(&tenant(), &second).await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        assert_eq!(vault.store().get(path).await.unwrap().unwrap(), before);
        let read = vault.read_resident(&tenant(), "r-1", &[Role::Admin]).await.unwrap();
        assert_eq!(read["resident_name"], "Chinwe Okafor");
    }

    #[tokio::test]
    async fn test_read_resident_is_role_gated() {
        let vault = vault();
        let id = vault.create_resident(&tenant(), &resident()).await.unwrap();

        let viewer = vault.read_resident(&tenant(), &id, &[Role::Viewer]).await.unwrap();
        assert_eq!(viewer["resident_name"], "Chinwe Okafor");
        assert!(!viewer.contains_key("cell_phone"));
        assert!(!viewer.contains_key("pcp"));

        let caregiver = vault.read_resident(&tenant(), &id, &[Role::Caregiver]).await.unwrap();
        assert_eq!(caregiver["cell_phone"], "+234 802 000 1111");
        assert!(!caregiver.contains_key("pcp"));

        let admin = vault.read_resident(&tenant(), &id, &[Role::Admin]).await.unwrap();
        let mut expected = resident();
        expected.insert("id".to_string(), json!(id));
        assert_eq!(admin, expected);
    }

    #[tokio::test]
    async fn test_read_missing_resident() {
        let vault = vault();
        let result = vault.read_resident(&tenant(), "nobody", &[Role::Admin]).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_write_and_read_record() {
        let vault = vault();
        let resident_id = vault.create_resident(&tenant(), &resident()).await.unwrap();
        let goal = map(json!({
            "resident_id": resident_id,
            "lifecycle_status": "active",
            "priority": "high",
            "description": {"code": {"coding": [], "text": "Walk unaided"}},
        }));

        let id = vault
            .write_record(&tenant(), &resident_id, RecordKind::Goal, &goal)
            .await
            .unwrap();
        let read = vault.read_record(&tenant(), &resident_id, RecordKind::Goal, &id).await.unwrap();

        let mut expected = goal;
        expected.insert("id".to_string(), json!(id));
        assert_eq!(read, expected);
    }

    #[tokio::test]
    async fn test_records_reuse_resident_dek() {
        let vault = vault();
        let resident_id = vault.create_resident(&tenant(), &resident()).await.unwrap();
        let identifier = map(json!({"system": "NIN", "value": "123"}));

        let id = vault
            .write_record(&tenant(), &resident_id, RecordKind::Identifier, &identifier)
            .await
            .unwrap();
        let resident_doc = vault
            .store()
            .get(&format!("providers/clinic-1/residents/{resident_id}"))
            .await
            .unwrap()
            .unwrap();
        let record_doc = vault
            .store()
            .get(&format!("providers/clinic-1/residents/{resident_id}/identifiers/{id}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record_doc["encrypted_dek"], resident_doc["encrypted_dek_general"]);
    }

    #[tokio::test]
    async fn test_write_for_missing_resident() {
        let vault = vault();
        let identifier = map(json!({"system": "NIN", "value": "123"}));
        let result =
            vault.write_record(&tenant(), "ghost", RecordKind::Identifier, &identifier).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_domain_key_created_once() {
        let vault = vault();
        let path = "providers/clinic-1/residents/legacy";
        vault.store().set(path, map(json!({"facility_id": "fac-1"})), false).await.unwrap();

        let first = vault.domain_key(&tenant(), "legacy", Domain::Clinical).await.unwrap();
        let second = vault.domain_key(&tenant(), "legacy", Domain::Clinical).await.unwrap();
        assert_eq!(first.wrapped(), second.wrapped());
    }

    #[tokio::test]
    async fn test_apply_changes_rejects_overlap() {
        let vault = vault();
        let resident_id = vault.create_resident(&tenant(), &resident()).await.unwrap();
        let changes = CollectionChanges {
            upserts: vec![map(json!({"id": "p1", "amount": {"value": 10}, "payor": "self"}))],
            deletions: vec!["p1".to_string()],
        };

        let result =
            vault.apply_changes(&tenant(), &resident_id, RecordKind::Payment, &changes).await;
        assert!(matches!(result, Err(Error::SchemaViolation(_))));
    }

    #[tokio::test]
    async fn test_apply_changes_rejects_repeated_upsert() {
        let vault = vault();
        let resident_id = vault.create_resident(&tenant(), &resident()).await.unwrap();
        let changes = CollectionChanges {
            upserts: vec![
                map(json!({"id": "p1", "amount": {"value": 10}, "payor": "self"})),
                map(json!({"id": "p1", "amount": {"value": 99}, "payor": "NHIS"})),
            ],
            deletions: vec![],
        };

        let result =
            vault.apply_changes(&tenant(), &resident_id, RecordKind::Payment, &changes).await;
        assert!(matches!(result, Err(Error::SchemaViolation(_))));

        let listed =
            vault.list_records(&tenant(), &resident_id, RecordKind::Payment).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_apply_changes_summary() {
        let vault = vault();
        let resident_id = vault.create_resident(&tenant(), &resident()).await.unwrap();
        let changes = CollectionChanges {
            upserts: vec![
                map(json!({"amount": {"value": 10}, "payor": "self"})),
                map(json!({"id": "p2", "amount": {"value": 20}, "payor": "NHIS"})),
            ],
            deletions: vec!["p3".to_string()],
        };

        let summary = vault
            .apply_changes(&tenant(), &resident_id, RecordKind::Payment, &changes)
            .await
            .unwrap();
        assert_eq!(summary.created.len(), 1);
        assert_eq!(summary.updated, vec!["p2".to_string()]);
        assert_eq!(summary.deleted, vec!["p3".to_string()]);

        let listed =
            vault.list_records(&tenant(), &resident_id, RecordKind::Payment).await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
