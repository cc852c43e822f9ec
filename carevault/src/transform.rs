//! Generic record transformer.
//!
//! Converts a plaintext field map into its encrypted-at-rest form and back,
//! driven entirely by the record kind's [`FieldSpec`] table.

use secrecy::SecretVec;
use serde_json::Value;

use crate::cipher::FieldCipher;
use crate::dek::{DataKey, WrappedDek};
use crate::error::{Error, Result};
use crate::schema::{
    encrypted_name, find_field, is_identifier, type_name, FieldClass, FieldSpec, Part,
    RecordKind, ValueKind, DEK_FIELD, ENCRYPTED_PREFIX,
};
use crate::FieldMap;

/// Encrypts a plaintext record of `kind` under `key`.
///
/// Identifier and clear fields are copied, sensitive fields are stored as
/// `encrypted_<field>`, and the wrapped DEK is attached as `encrypted_dek`.
///
/// # Errors
///
/// Returns error if:
/// - `key` belongs to another domain than `kind` (`Error::Config`)
/// - The record does not match the schema (`Error::SchemaViolation`)
/// - A field fails to encrypt (`Error::Field`)
///
/// # Example
///
/// ```rust,ignore
/// let key = dek_manager.generate_data_key(RecordKind::Allergy.domain()).await?;
/// let stored = to_encrypted_record(RecordKind::Allergy, &allergy, &key)?;
/// assert!(stored.contains_key("encrypted_name"));
/// ```
pub fn to_encrypted_record(
    kind: RecordKind,
    plaintext: &FieldMap,
    key: &DataKey,
) -> Result<FieldMap> {
    let schema = kind.schema();
    if key.domain() != schema.domain {
        return Err(Error::Config(format!(
            "{kind} records use the {} domain, got a {} key",
            schema.domain,
            key.domain()
        )));
    }
    validate_plaintext(schema.fields, plaintext)?;

    let cipher = FieldCipher::new(key.plaintext())?;
    let mut encrypted = FieldMap::new();
    copy_clear(schema.fields, plaintext, &mut encrypted);
    encrypt_fields(schema.fields, plaintext, &cipher, &mut encrypted)?;
    encrypted.insert(DEK_FIELD.to_string(), Value::String(key.wrapped().to_base64()));

    Ok(encrypted)
}

/// Decrypts a stored record of `kind` with its unwrapped DEK.
///
/// Missing or `null` encrypted fields are omitted from the result. The
/// output is validated against the same schema as the input to
/// [`to_encrypted_record`].
///
/// # Errors
///
/// Returns error if:
/// - The stored map has an unexpected shape (`Error::SchemaViolation`)
/// - Any field fails to decrypt or re-parse (`Error::Field` naming it)
/// - The decrypted record does not match the schema (`Error::SchemaViolation`)
pub fn to_plaintext_record(
    kind: RecordKind,
    encrypted: &FieldMap,
    dek: &SecretVec<u8>,
) -> Result<FieldMap> {
    let schema = kind.schema();
    check_encrypted_shape(schema.fields, encrypted, &[DEK_FIELD])?;

    let cipher = FieldCipher::new(dek)?;
    let mut plaintext = FieldMap::new();
    copy_clear(schema.fields, encrypted, &mut plaintext);
    decrypt_fields(schema.fields, encrypted, &cipher, &mut plaintext)?;

    validate_plaintext(schema.fields, &plaintext)?;
    Ok(plaintext)
}

/// Extracts the wrapped DEK carried by a stored record.
///
/// # Errors
///
/// Returns `Error::SchemaViolation` if `encrypted_dek` is missing or not a
/// string, and `Error::KeyUnwrap` if it is not valid base64.
pub fn wrapped_dek(encrypted: &FieldMap) -> Result<WrappedDek> {
    match encrypted.get(DEK_FIELD) {
        Some(Value::String(encoded)) => WrappedDek::from_base64(encoded),
        Some(other) => Err(Error::SchemaViolation(format!(
            "`{DEK_FIELD}` must be a string, found {}",
            type_name(other)
        ))),
        None => Err(Error::SchemaViolation(format!("missing `{DEK_FIELD}`"))),
    }
}

/// True when a value counts as absent: missing, `null` or `""`.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Checks a plaintext record against a field table.
///
/// Identifiers are always allowed. Any other field must be listed, and its
/// value must match the listed kind.
pub(crate) fn validate_plaintext(fields: &[FieldSpec], record: &FieldMap) -> Result<()> {
    for (name, value) in record {
        if is_identifier(name) {
            if !matches!(value, Value::String(_) | Value::Null) {
                return Err(Error::SchemaViolation(format!(
                    "identifier `{name}` must be a string, found {}",
                    type_name(value)
                )));
            }
            continue;
        }
        let Some(spec) = find_field(fields, name) else {
            return Err(Error::SchemaViolation(format!("unexpected field `{name}`")));
        };
        if value.is_null() {
            continue;
        }
        match spec.class {
            FieldClass::Clear => {}
            FieldClass::Sensitive(kind) => check_kind(name, kind, value)?,
            FieldClass::Composite(parts) => validate_composite(name, parts, value)?,
        }
    }

    for spec in fields.iter().filter(|spec| spec.required) {
        if is_blank(record.get(spec.name)) {
            return Err(Error::SchemaViolation(format!("missing required field `{}`", spec.name)));
        }
    }
    Ok(())
}

fn check_kind(name: &str, kind: ValueKind, value: &Value) -> Result<()> {
    if kind.accepts(value) {
        return Ok(());
    }
    Err(Error::SchemaViolation(format!("`{name}` must be {kind}, found {}", type_name(value))))
}

fn validate_composite(name: &str, parts: &[Part], value: &Value) -> Result<()> {
    let Value::Object(nested) = value else {
        return Err(Error::SchemaViolation(format!(
            "`{name}` must be an object, found {}",
            type_name(value)
        )));
    };

    for (key, part_value) in nested {
        if key == "id" {
            if !part_value.is_string() {
                return Err(Error::SchemaViolation(format!("`{name}.id` must be a string")));
            }
            continue;
        }
        let Some(part) = parts.iter().find(|p| p.name == key) else {
            return Err(Error::SchemaViolation(format!("unexpected field `{name}.{key}`")));
        };
        if !part_value.is_null() {
            check_kind(&format!("{name}.{key}"), part.kind, part_value)?;
        }
    }

    for part in parts.iter().filter(|p| p.required) {
        if is_blank(nested.get(part.name)) {
            return Err(Error::SchemaViolation(format!(
                "missing required field `{name}.{}`",
                part.name
            )));
        }
    }
    Ok(())
}

/// Checks that a stored map only carries identifiers, clear fields,
/// `encrypted_*` strings for listed fields and composite objects.
///
/// `reserved` names extra fields the caller handles itself, such as the
/// wrapped DEK.
pub(crate) fn check_encrypted_shape(
    fields: &[FieldSpec],
    encrypted: &FieldMap,
    reserved: &[&str],
) -> Result<()> {
    for (name, value) in encrypted {
        if is_identifier(name) || reserved.contains(&name.as_str()) {
            continue;
        }

        if let Some(spec) = find_field(fields, name) {
            match spec.class {
                FieldClass::Clear => {}
                FieldClass::Composite(parts) => check_composite_shape(name, parts, value)?,
                FieldClass::Sensitive(_) => {
                    return Err(Error::SchemaViolation(format!(
                        "plaintext field `{name}` in encrypted record"
                    )));
                }
            }
            continue;
        }

        let listed = name
            .strip_prefix(ENCRYPTED_PREFIX)
            .and_then(|plain| find_field(fields, plain))
            .is_some_and(|spec| matches!(spec.class, FieldClass::Sensitive(_)));
        if !listed {
            return Err(Error::SchemaViolation(format!("unexpected field `{name}`")));
        }
        check_token_shape(name, value)?;
    }
    Ok(())
}

fn check_composite_shape(name: &str, parts: &[Part], value: &Value) -> Result<()> {
    let nested = match value {
        Value::Object(nested) => nested,
        Value::Null => return Ok(()),
        other => {
            return Err(Error::SchemaViolation(format!(
                "`{name}` must be an object, found {}",
                type_name(other)
            )));
        }
    };

    for (key, part_value) in nested {
        if key == "id" {
            continue;
        }
        let listed = key
            .strip_prefix(ENCRYPTED_PREFIX)
            .is_some_and(|plain| parts.iter().any(|p| p.name == plain));
        if !listed {
            return Err(Error::SchemaViolation(format!("unexpected field `{name}.{key}`")));
        }
        check_token_shape(&format!("{name}.{key}"), part_value)?;
    }
    Ok(())
}

fn check_token_shape(name: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(_) | Value::Null => Ok(()),
        other => Err(Error::SchemaViolation(format!(
            "`{name}` must hold a ciphertext string, found {}",
            type_name(other)
        ))),
    }
}

/// Copies identifiers and listed clear fields.
pub(crate) fn copy_clear(fields: &[FieldSpec], from: &FieldMap, to: &mut FieldMap) {
    for (name, value) in from {
        let clear = is_identifier(name)
            || find_field(fields, name).is_some_and(|spec| spec.class == FieldClass::Clear);
        if clear {
            to.insert(name.clone(), value.clone());
        }
    }
}

/// Encrypts every listed sensitive and composite field present in
/// `plaintext` into `out`.
pub(crate) fn encrypt_fields(
    fields: &[FieldSpec],
    plaintext: &FieldMap,
    cipher: &FieldCipher,
    out: &mut FieldMap,
) -> Result<()> {
    for spec in fields {
        let Some(value) = plaintext.get(spec.name) else {
            continue;
        };
        match spec.class {
            FieldClass::Clear => {}
            FieldClass::Sensitive(kind) => {
                if let Some(token) = encrypt_value(kind, value, cipher)
                    .map_err(|e| Error::field(spec.name, e))?
                {
                    out.insert(encrypted_name(spec.name), Value::String(token));
                }
            }
            FieldClass::Composite(parts) => {
                if let Value::Object(nested) = value {
                    let sealed = encrypt_composite(spec.name, parts, nested, cipher)?;
                    out.insert(spec.name.to_string(), Value::Object(sealed));
                }
            }
        }
    }
    Ok(())
}

fn encrypt_value(kind: ValueKind, value: &Value, cipher: &FieldCipher) -> Result<Option<String>> {
    kind.encode(value)?.map(|encoded| cipher.encrypt(&encoded)).transpose()
}

fn encrypt_composite(
    name: &str,
    parts: &[Part],
    nested: &FieldMap,
    cipher: &FieldCipher,
) -> Result<FieldMap> {
    let mut sealed = FieldMap::new();
    if let Some(id) = nested.get("id") {
        sealed.insert("id".to_string(), id.clone());
    }
    for part in parts {
        let Some(value) = nested.get(part.name) else {
            continue;
        };
        if let Some(token) = encrypt_value(part.kind, value, cipher)
            .map_err(|e| Error::field(format!("{name}.{}", part.name), e))?
        {
            sealed.insert(encrypted_name(part.name), Value::String(token));
        }
    }
    Ok(sealed)
}

/// Decrypts every listed sensitive and composite field found in
/// `encrypted` into `out`.
pub(crate) fn decrypt_fields(
    fields: &[FieldSpec],
    encrypted: &FieldMap,
    cipher: &FieldCipher,
    out: &mut FieldMap,
) -> Result<()> {
    for spec in fields {
        match spec.class {
            FieldClass::Clear => {}
            FieldClass::Sensitive(kind) => {
                let value = decrypt_value(kind, encrypted.get(&encrypted_name(spec.name)), cipher)
                    .map_err(|e| Error::field(spec.name, e))?;
                if let Some(value) = value {
                    out.insert(spec.name.to_string(), value);
                }
            }
            FieldClass::Composite(parts) => {
                if let Some(Value::Object(nested)) = encrypted.get(spec.name) {
                    let opened = decrypt_composite(spec.name, parts, nested, cipher)?;
                    out.insert(spec.name.to_string(), Value::Object(opened));
                }
            }
        }
    }
    Ok(())
}

fn decrypt_value(
    kind: ValueKind,
    stored: Option<&Value>,
    cipher: &FieldCipher,
) -> Result<Option<Value>> {
    match stored {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(token)) => kind.decode(&cipher.decrypt(token)?).map(Some),
        Some(other) => Err(Error::SchemaViolation(format!(
            "expected a ciphertext string, found {}",
            type_name(other)
        ))),
    }
}

fn decrypt_composite(
    name: &str,
    parts: &[Part],
    nested: &FieldMap,
    cipher: &FieldCipher,
) -> Result<FieldMap> {
    let mut opened = FieldMap::new();
    if let Some(id) = nested.get("id").filter(|id| !id.is_null()) {
        opened.insert("id".to_string(), id.clone());
    }
    for part in parts {
        let value = decrypt_value(part.kind, nested.get(&encrypted_name(part.name)), cipher)
            .map_err(|e| Error::field(format!("{name}.{}", part.name), e))?;
        if let Some(value) = value {
            opened.insert(part.name.to_string(), value);
        }
    }
    Ok(opened)
}
