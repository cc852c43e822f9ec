//! Bulk encryption of a plaintext dataset into an import payload.
//!
//! The input directory holds `residents.json` plus one `<collection>.json`
//! per sub-record kind, each an array of `{"id": ..., "data": {...}}`
//! entries. Every resident gets one DEK per domain, shared by all of its
//! sub-records. The output is JSONL, one `{"path", "data"}` line per
//! document.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use carevault::context::TenantId;
use carevault::dek::DekManager;
use carevault::kek::KekResolver;
use carevault::schema::RecordKind;
use carevault::service::ResidentVault;
use carevault::store::MemoryStore;
use carevault::FieldMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Counts reported after a dataset run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    /// Residents created
    pub residents: usize,
    /// Documents written to the payload
    pub documents: usize,
    /// Sub-records dropped because their resident is unknown
    pub skipped: usize,
}

/// Reads `[{"id", "data"}]` entries, also accepting bare objects.
fn load_entries(path: &Path) -> Result<Option<Vec<FieldMap>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let entries: Vec<Value> = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Object(mut entry) = entry else {
            bail!("{}: every entry must be a JSON object", path.display());
        };
        let record = match entry.remove("data") {
            Some(Value::Object(mut data)) => {
                if let Some(id) = entry.remove("id") {
                    data.insert("id".to_string(), id);
                }
                data
            }
            Some(_) => bail!("{}: `data` must be a JSON object", path.display()),
            None => entry,
        };
        records.push(record);
    }
    Ok(Some(records))
}

/// Finds the resident a sub-record belongs to.
fn owner_id(record: &FieldMap) -> Option<&str> {
    record
        .get("resident_id")
        .or_else(|| record.get("beneficiary_id"))
        .or_else(|| record.get("subject").and_then(|subject| subject.get("id")))
        .and_then(Value::as_str)
}

/// Encrypts every resident and sub-record under `input` and writes the
/// stored documents to `output` as JSONL.
///
/// # Errors
///
/// Fails on unreadable input, any record that does not match its schema,
/// or any key failure. Sub-records of unknown residents are skipped.
pub async fn encrypt_dataset<R: KekResolver>(
    keys: DekManager<R>,
    tenant: &str,
    input: &Path,
    output: &Path,
) -> Result<DatasetSummary> {
    let tenant = TenantId::new(tenant)?;
    let vault = ResidentVault::new(MemoryStore::new(), keys);
    let mut summary = DatasetSummary::default();

    let residents_file = input.join("residents.json");
    let Some(residents) = load_entries(&residents_file)? else {
        bail!("{} not found", residents_file.display());
    };

    let mut known = HashSet::new();
    for resident in &residents {
        let id = vault
            .create_resident(&tenant, resident)
            .await
            .with_context(|| format!("encrypting resident {:?}", resident.get("id")))?;
        known.insert(id);
    }
    summary.residents = known.len();
    info!(residents = summary.residents, "encrypted residents");

    for kind in RecordKind::ALL {
        let file = input.join(format!("{}.json", kind.collection()));
        let Some(records) = load_entries(&file)? else {
            debug!(%kind, "no input file");
            continue;
        };
        for record in &records {
            let Some(resident_id) = owner_id(record).filter(|id| known.contains(*id)) else {
                warn!(%kind, record_id = ?record.get("id"), "no matching resident, skipping");
                summary.skipped += 1;
                continue;
            };
            vault
                .write_record(&tenant, resident_id, kind, record)
                .await
                .with_context(|| format!("encrypting {kind} {:?}", record.get("id")))?;
        }
        info!(%kind, records = records.len(), "encrypted collection");
    }

    let out = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(out);
    for (path, data) in vault.store().snapshot().await {
        serde_json::to_writer(&mut out, &json!({ "path": path, "data": data }))?;
        out.write_all(b"\n")?;
        summary.documents += 1;
    }
    out.flush()?;

    Ok(summary)
}
