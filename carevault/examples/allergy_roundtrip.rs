//! Stores and reads back a resident allergy with `CareVault`.

use carevault::prelude::*;
use carevault_key_file::FileKeyResolver;
use serde_json::json;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("CareVault Allergy Example");
    println!("=========================\n");

    let key_dir = PathBuf::from("./example_keys");
    let paths = if key_dir.exists() {
        Domain::ALL.into_iter().fold(KekPaths::default(), |paths, domain| {
            paths.with(domain, FileKeyResolver::file_name(domain))
        })
    } else {
        println!("Initializing key directory at {}...", key_dir.display());
        FileKeyResolver::init(&key_dir)?
    };
    paths.validate()?;

    let resolver = FileKeyResolver::new(&key_dir)?;
    let vault = ResidentVault::new(MemoryStore::new(), DekManager::new(resolver, paths));
    let tenant = TenantId::new("clinic-7")?;

    let resident = json!({
        "facility_id": "fac-1",
        "resident_name": "Chinwe Okafor",
        "dob": "1941-07-19",
        "pcp": "Dr. Bello",
    });
    let resident_id = vault.create_resident(&tenant, &to_map(resident)).await?;
    println!("✓ Resident {resident_id} created with four domain keys\n");

    let allergy = json!({
        "resident_id": resident_id,
        "name": "Penicillin",
        "substance": {"coding": [{"system": "http://snomed.info/sct", "code": "764146007"}]},
        "reaction": {"severity": "severe"},
    });
    let allergy_id =
        vault.write_record(&tenant, &resident_id, RecordKind::Allergy, &to_map(allergy)).await?;

    let path = format!("{}/{resident_id}/allergies/{allergy_id}", tenant.residents_path());
    let stored = vault.store().get(&path).await?.unwrap_or_default();
    println!("Stored document at {path}:");
    println!("{}\n", serde_json::to_string_pretty(&stored)?);

    let read = vault.read_record(&tenant, &resident_id, RecordKind::Allergy, &allergy_id).await?;
    println!("Decrypted allergy:");
    println!("{}\n", serde_json::to_string_pretty(&read)?);

    let visible = vault.read_resident(&tenant, &resident_id, &[Role::Viewer]).await?;
    println!("A viewer sees {} resident fields (no dob, no pcp)", visible.len());

    println!("\nNote: Key directory at {} can be deleted manually", key_dir.display());
    Ok(())
}

fn to_map(value: serde_json::Value) -> FieldMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => FieldMap::new(),
    }
}
