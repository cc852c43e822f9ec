//! Integration tests for carevault with `FileKeyResolver` and `MemoryStore`.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use carevault::prelude::*;
use carevault::schema::{FieldClass, FieldSpec, ValueKind};
use carevault::transform::wrapped_dek;
use carevault_key_file::FileKeyResolver;
use secrecy::{ExposeSecret, SecretVec};
use serde_json::{json, Value};
use tempfile::TempDir;

type FileVault = ResidentVault<MemoryStore, FileKeyResolver>;

struct Fixture {
    _keys: TempDir,
    vault: FileVault,
    tenant: TenantId,
}

fn fixture() -> Fixture {
    let keys = TempDir::new().expect("Failed to create temp dir");
    let paths = FileKeyResolver::init(keys.path()).expect("Failed to initialize keys");
    let resolver = FileKeyResolver::new(keys.path()).expect("Failed to create resolver");
    Fixture {
        vault: ResidentVault::new(MemoryStore::new(), DekManager::new(resolver, paths)),
        tenant: TenantId::new("clinic-1").unwrap(),
        _keys: keys,
    }
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
        "resident_name": "Chinwe Okafor",
        "gender": "female",
        "dob": "1941-07-19",
        "cell_phone": "+234 802 000 1111",
        "pcp": "Dr. Bello",
    }))
}

fn sample_value(name: &str, kind: ValueKind) -> Value {
    match kind {
        ValueKind::Text => json!(format!("sample {name}")),
        ValueKind::Json => json!({"text": name, "coding": [{"code": "42"}]}),
        ValueKind::Integer => json!(3),
        ValueKind::Float => json!(12.5),
        ValueKind::Bool => json!(true),
    }
}

/// A record filling every field of the table with a value of its kind.
fn sample_record(fields: &[FieldSpec], resident_id: &str) -> FieldMap {
    let mut record = FieldMap::new();
    record.insert("resident_id".to_string(), json!(resident_id));
    for spec in fields {
        let value = match spec.class {
            FieldClass::Clear => json!(["x1", "x2"]),
            FieldClass::Sensitive(kind) => sample_value(spec.name, kind),
            FieldClass::Composite(parts) => {
                let mut nested = FieldMap::new();
                nested.insert("id".to_string(), json!("ref-1"));
                for part in parts {
                    nested.insert(part.name.to_string(), sample_value(part.name, part.kind));
                }
                Value::Object(nested)
            }
        };
        record.insert(spec.name.to_string(), value);
    }
    record
}

fn allergy() -> FieldMap {
    map(json!({
        "name": "Penicillin",
        "substance": {"coding": [{"system": "http://snomed.info/sct", "code": "764146007"}]},
        "reaction": {"severity": "severe", "manifestation": ["hives", "wheezing"]},
    }))
}

#[tokio::test]
async fn test_every_kind_round_trips() {
    let fx = fixture();
    let resident_id = fx.vault.create_resident(&fx.tenant, &resident()).await.unwrap();

    for kind in RecordKind::ALL {
        let record = sample_record(kind.schema().fields, &resident_id);
        let id = fx.vault.write_record(&fx.tenant, &resident_id, kind, &record).await.unwrap();
        let read = fx.vault.read_record(&fx.tenant, &resident_id, kind, &id).await.unwrap();

        let mut expected = record;
        expected.insert("id".to_string(), json!(id));
        assert_eq!(read, expected, "{kind} did not round-trip");
    }
}

#[tokio::test]
async fn test_allergy_example_scenario() {
    let fx = fixture();
    let key = fx.vault.keys().generate_data_key(Domain::Clinical).await.unwrap();

    let stored = to_encrypted_record(RecordKind::Allergy, &allergy(), &key).unwrap();
    for field in ["encrypted_name", "encrypted_substance", "encrypted_reaction", "encrypted_dek"] {
        assert!(stored.contains_key(field), "missing {field}");
    }
    assert!(!stored.contains_key("name"));
    assert!(!stored.values().any(|v| v.to_string().contains("Penicillin")));

    let restored = to_plaintext_record(RecordKind::Allergy, &stored, key.plaintext()).unwrap();
    assert_eq!(restored, allergy());
}

#[tokio::test]
async fn test_financial_transaction_round_trips() {
    let fx = fixture();
    let resident_id = fx.vault.create_resident(&fx.tenant, &resident()).await.unwrap();
    let transaction = map(json!({
        "resident_id": resident_id,
        "amount": 2500.75,
        "date": "2024-03-01",
        "type": "charge",
        "description": "March room and board",
    }));

    let kind = RecordKind::FinancialTransaction;
    let id = fx.vault.write_record(&fx.tenant, &resident_id, kind, &transaction).await.unwrap();

    let path = format!("{}/{resident_id}/financials/{id}", fx.tenant.residents_path());
    let stored = fx.vault.store().get(&path).await.unwrap().unwrap();
    assert!(stored.contains_key("encrypted_amount"));
    assert!(!stored.contains_key("amount"));
    assert!(!stored.values().any(|v| v.to_string().contains("room and board")));

    let read = fx.vault.read_record(&fx.tenant, &resident_id, kind, &id).await.unwrap();
    assert_eq!(read["amount"], json!(2500.75));
    assert_eq!(read["description"], json!("March room and board"));
}

#[tokio::test]
async fn test_key_isolation() {
    let fx = fixture();
    let key_a = fx.vault.keys().generate_data_key(Domain::Clinical).await.unwrap();
    let key_b = fx.vault.keys().generate_data_key(Domain::Clinical).await.unwrap();

    let stored = to_encrypted_record(RecordKind::Allergy, &allergy(), &key_a).unwrap();
    let err = to_plaintext_record(RecordKind::Allergy, &stored, key_b.plaintext()).unwrap_err();

    assert!(matches!(err, Error::Field { .. }));
    assert!(matches!(err.root(), Error::Decryption(_) | Error::MalformedToken(_)));
}

#[tokio::test]
async fn test_domain_isolation() {
    let fx = fixture();
    let financial = fx.vault.keys().generate_data_key(Domain::Financial).await.unwrap();

    let result = fx.vault.keys().decrypt_data_key(financial.wrapped(), Domain::Clinical).await;
    assert!(matches!(result, Err(Error::KeyUnwrap(_))));
}

#[tokio::test]
async fn test_ciphertext_is_not_deterministic() {
    let fx = fixture();
    let key = fx.vault.keys().generate_data_key(Domain::Clinical).await.unwrap();

    let first = to_encrypted_record(RecordKind::Allergy, &allergy(), &key).unwrap();
    let second = to_encrypted_record(RecordKind::Allergy, &allergy(), &key).unwrap();
    assert_ne!(first["encrypted_name"], second["encrypted_name"]);

    let dek = key.plaintext();
    assert_eq!(
        to_plaintext_record(RecordKind::Allergy, &first, dek).unwrap(),
        to_plaintext_record(RecordKind::Allergy, &second, dek).unwrap()
    );
}

#[tokio::test]
async fn test_sparse_fields_stay_absent() {
    let fx = fixture();
    let key = fx.vault.keys().generate_data_key(Domain::Clinical).await.unwrap();
    let mut record = allergy();
    record.insert("clinical_status".to_string(), json!(""));
    record.insert("recorded_date".to_string(), Value::Null);

    let stored = to_encrypted_record(RecordKind::Allergy, &record, &key).unwrap();
    assert!(!stored.contains_key("encrypted_clinical_status"));
    assert!(!stored.contains_key("encrypted_recorded_date"));
    assert!(!stored.contains_key("encrypted_verification_status"));

    let restored = to_plaintext_record(RecordKind::Allergy, &stored, key.plaintext()).unwrap();
    assert_eq!(restored, allergy());
}

#[tokio::test]
async fn test_wrapped_dek_unwraps_to_32_bytes() {
    let fx = fixture();
    let resident_id = fx.vault.create_resident(&fx.tenant, &resident()).await.unwrap();
    let id = fx
        .vault
        .write_record(&fx.tenant, &resident_id, RecordKind::Allergy, &allergy())
        .await
        .unwrap();

    let path = format!("providers/clinic-1/residents/{resident_id}/allergies/{id}");
    let stored = fx.vault.store().get(&path).await.unwrap().unwrap();
    let encoded = stored["encrypted_dek"].as_str().unwrap();
    assert_eq!(STANDARD.decode(encoded).unwrap().len(), 60);

    let wrapped = wrapped_dek(&stored).unwrap();
    let dek: SecretVec<u8> =
        fx.vault.keys().decrypt_data_key(&wrapped, Domain::Clinical).await.unwrap();
    assert_eq!(dek.expose_secret().len(), 32);
}

#[tokio::test]
async fn test_wrong_kek_path_fails_before_fields() {
    let keys = TempDir::new().unwrap();
    let paths = FileKeyResolver::init(keys.path()).unwrap();
    let resolver = FileKeyResolver::new(keys.path()).unwrap();
    let store = Arc::new(MemoryStore::new());
    let tenant = TenantId::new("clinic-1").unwrap();

    let vault =
        ResidentVault::new(Arc::clone(&store), DekManager::new(resolver.clone(), paths.clone()));
    let resident_id = vault.create_resident(&tenant, &resident()).await.unwrap();
    let id = vault
        .write_record(&tenant, &resident_id, RecordKind::Allergy, &allergy())
        .await
        .unwrap();

    let swapped = paths.with(Domain::Clinical, "kek-financial.key");
    let misconfigured = ResidentVault::new(store, DekManager::new(resolver, swapped));
    let err = misconfigured
        .read_record(&tenant, &resident_id, RecordKind::Allergy, &id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeyUnwrap(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_atomic_collection_mutation() {
    let fx = fixture();
    let resident_id = fx.vault.create_resident(&fx.tenant, &resident()).await.unwrap();
    let payment = |id: &str, value: f64| {
        map(json!({"id": id, "amount": {"value": value, "currency": "NGN"}, "payor": "NHIS"}))
    };

    let seed = CollectionChanges {
        upserts: vec![payment("p1", 100.0), payment("p2", 200.0), payment("p3", 300.0)],
        deletions: vec![],
    };
    fx.vault.apply_changes(&fx.tenant, &resident_id, RecordKind::Payment, &seed).await.unwrap();
    let before = fx.vault.store().snapshot().await;

    let changes = CollectionChanges {
        upserts: vec![payment("p1", 150.0), payment("p2", 250.0)],
        deletions: vec!["p3".to_string()],
    };
    fx.vault.store().fail_next_commit_after(2).await;
    let result =
        fx.vault.apply_changes(&fx.tenant, &resident_id, RecordKind::Payment, &changes).await;
    assert!(matches!(result, Err(Error::Storage(_))));
    assert_eq!(fx.vault.store().snapshot().await, before);

    let summary = fx
        .vault
        .apply_changes(&fx.tenant, &resident_id, RecordKind::Payment, &changes)
        .await
        .unwrap();
    assert_eq!(summary.updated, vec!["p1".to_string(), "p2".to_string()]);
    assert_eq!(summary.deleted, vec!["p3".to_string()]);

    let listed =
        fx.vault.list_records(&fx.tenant, &resident_id, RecordKind::Payment).await.unwrap();
    let amounts: Vec<&Value> = listed.iter().map(|p| &p["amount"]["value"]).collect();
    assert_eq!(amounts, vec![&json!(150.0), &json!(250.0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_domain_key_creation_converges() {
    let fx = fixture();
    let path = "providers/clinic-1/residents/legacy";
    fx.vault.store().set(path, map(json!({"facility_id": "fac-1"})), false).await.unwrap();

    let vault = Arc::new(fx.vault);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let vault = Arc::clone(&vault);
        let tenant = fx.tenant.clone();
        handles.push(tokio::spawn(async move {
            vault.domain_key(&tenant, "legacy", Domain::Clinical).await
        }));
    }

    let mut keys = Vec::new();
    for handle in handles {
        keys.push(handle.await.unwrap().unwrap());
    }
    let stored = vault.store().get(path).await.unwrap().unwrap();
    let published = stored["encrypted_dek_clinical"].as_str().unwrap();
    for key in &keys {
        assert_eq!(key.wrapped().to_base64(), published);
        assert_eq!(key.plaintext().expose_secret(), keys[0].plaintext().expose_secret());
    }
}

#[tokio::test]
async fn test_resident_reads_are_role_gated() {
    let fx = fixture();
    let id = fx.vault.create_resident(&fx.tenant, &resident()).await.unwrap();

    let viewer = fx.vault.read_resident(&fx.tenant, &id, &[Role::Viewer]).await.unwrap();
    assert_eq!(viewer["resident_name"], "Chinwe Okafor");
    assert!(!viewer.contains_key("dob"));
    assert!(!viewer.contains_key("pcp"));

    let clinician = fx.vault.read_resident(&fx.tenant, &id, &[Role::Clinician]).await.unwrap();
    assert_eq!(clinician["pcp"], "Dr. Bello");
    assert_eq!(clinician["dob"], "1941-07-19");

    let mixed =
        fx.vault.read_resident(&fx.tenant, &id, &[Role::Viewer, Role::Caregiver]).await.unwrap();
    assert_eq!(mixed["cell_phone"], "+234 802 000 1111");
    assert!(!mixed.contains_key("pcp"));
}

#[tokio::test]
async fn test_missing_resident_surfaces_as_not_found() {
    let fx = fixture();
    let result = fx
        .vault
        .write_record(&fx.tenant, "nobody", RecordKind::Allergy, &allergy())
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let outcome: ActionResult<String> =
        ActionResult::from_error("add allergy", "resident", &err);
    assert_eq!(outcome.message, "Resident not found.");
}
