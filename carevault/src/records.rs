//! Typed records on top of the field-map transformer.
//!
//! Each struct mirrors its kind's field table; serde converts to and from
//! the untyped [`FieldMap`] that the transformer works on.

use secrecy::SecretVec;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::dek::DataKey;
use crate::error::{Error, Result};
use crate::schema::RecordKind;
use crate::transform::{to_encrypted_record, to_plaintext_record};
use crate::FieldMap;

/// A plaintext record type with a fixed kind.
pub trait Record: Serialize + DeserializeOwned {
    /// Kind whose field table applies to this type.
    const KIND: RecordKind;
}

/// Serializes and encrypts a typed record.
///
/// # Errors
///
/// Returns `Error::SchemaViolation` if the record does not serialize to a
/// JSON object, plus every error of [`to_encrypted_record`].
pub fn encrypt_record<T: Record>(record: &T, key: &DataKey) -> Result<FieldMap> {
    let map = to_field_map(record)?;
    to_encrypted_record(T::KIND, &map, key)
}

/// Decrypts a stored record into its typed form.
///
/// # Errors
///
/// Returns every error of [`to_plaintext_record`], and
/// `Error::SchemaViolation` if the decrypted fields do not deserialize.
pub fn decrypt_record<T: Record>(encrypted: &FieldMap, dek: &SecretVec<u8>) -> Result<T> {
    let map = to_plaintext_record(T::KIND, encrypted, dek)?;
    from_field_map(map)
}

/// Converts a typed record into a field map.
///
/// # Errors
///
/// Returns `Error::SchemaViolation` if the record does not serialize to a
/// JSON object.
pub fn to_field_map<T: Serialize>(record: &T) -> Result<FieldMap> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::SchemaViolation("record must serialize to an object".to_string())),
        Err(e) => Err(Error::SchemaViolation(format!("cannot serialize record: {e}"))),
    }
}

/// Converts a field map into a typed record.
///
/// # Errors
///
/// Returns `Error::SchemaViolation` if the map does not deserialize.
pub fn from_field_map<T: DeserializeOwned>(map: FieldMap) -> Result<T> {
    serde_json::from_value(Value::Object(map))
        .map_err(|e| Error::SchemaViolation(format!("cannot deserialize record: {e}")))
}

fn default_currency() -> String {
    "NGN".to_string()
}

/// One code from a terminology system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    /// Code system URI
    pub system: String,
    /// Code within the system
    pub code: String,
    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// A concept expressed as codings plus free text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    /// Codings for the concept
    #[serde(default)]
    pub coding: Vec<Coding>,
    /// Free-text form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    /// A concept with text only.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self { coding: Vec::new(), text: Some(text.into()) }
    }
}

/// A time range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Start, ISO 8601
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// End, ISO 8601
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// An amount of money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    /// Amount
    pub value: f64,
    /// ISO 4217 currency code
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Reaction recorded for an allergy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllergyReaction {
    /// What the reaction was
    pub code: CodeableConcept,
    /// mild, moderate or severe
    pub severity: String,
}

/// Allergy or intolerance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allergy {
    /// Record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Owning resident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_id: Option<String>,
    /// Staff member who recorded it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorder_id: Option<String>,
    /// Allergy name
    pub name: CodeableConcept,
    /// active, inactive or resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_status: Option<String>,
    /// confirmed, unconfirmed or refuted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<String>,
    /// allergy or intolerance
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub allergy_type: Option<String>,
    /// Date recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_date: Option<String>,
    /// Causative substance
    pub substance: CodeableConcept,
    /// Observed reaction
    pub reaction: AllergyReaction,
}

impl Record for Allergy {
    const KIND: RecordKind = RecordKind::Allergy;
}

/// Billable charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    /// Record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Owning resident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_id: Option<String>,
    /// Service billed
    pub service: String,
    /// Billing code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Units billed
    pub quantity: u32,
    /// Price per unit
    pub unit_price: Money,
    /// When the service happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_datetime: Option<String>,
    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Record for Charge {
    const KIND: RecordKind = RecordKind::Charge;
}

/// Party paying for a coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payor {
    /// Payor id, the resident's own id for self-pay
    pub id: String,
    /// Paying organization, absent for self-pay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

/// Insurance coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    /// Record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Covered resident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_id: Option<String>,
    /// active, cancelled, draft
    pub status: String,
    /// NHIS, private insurance, self-pay
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub coverage_type: Option<String>,
    /// Who pays
    pub payor: Payor,
    /// Coverage period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    /// Policy number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_number: Option<String>,
    /// Plan name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    /// Beneficiary relationship to the subscriber
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    /// Out-of-pocket cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_to_beneficiary: Option<f64>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored_on: Option<String>,
}

impl Record for Coverage {
    const KIND: RecordKind = RecordKind::Coverage;
}

/// Payment received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Owning resident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_id: Option<String>,
    /// Claim settled by this payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    /// Coverage the payment came through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_id: Option<String>,
    /// Amount paid
    pub amount: Money,
    /// Paying party
    pub payor: String,
    /// When it was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_datetime: Option<String>,
    /// EFT, cash, check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl Record for Payment {
    const KIND: RecordKind = RecordKind::Payment;
}

/// Emergency contact person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    /// Record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Owning resident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_id: Option<String>,
    /// Contact's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    /// Mobile number
    pub cell_phone: String,
    /// Work number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_phone: Option<String>,
    /// Home number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_phone: Option<String>,
    /// Relationships to the resident
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationship: Vec<String>,
}

impl Record for EmergencyContact {
    const KIND: RecordKind = RecordKind::EmergencyContact;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dek::WrappedDek;
    use crate::domain::Domain;
    use crate::kdf::generate_dek;
    use secrecy::ExposeSecret;

    fn key(domain: Domain) -> DataKey {
        DataKey::from_parts(domain, generate_dek(), WrappedDek::new(vec![1u8; 60]))
    }

    fn dek_of(key: &DataKey) -> SecretVec<u8> {
        SecretVec::new(key.plaintext().expose_secret().clone())
    }

    #[test]
    fn test_typed_allergy_round_trip() {
        let key = key(Domain::Clinical);
        let allergy = Allergy {
            id: None,
            resident_id: Some("res-1".to_string()),
            recorder_id: Some("nurse-4".to_string()),
            name: CodeableConcept::text("Penicillin"),
            clinical_status: Some("active".to_string()),
            verification_status: None,
            allergy_type: Some("allergy".to_string()),
            recorded_date: Some("2024-03-01".to_string()),
            substance: CodeableConcept {
                coding: vec![Coding {
                    system: "http://snomed.info/sct".to_string(),
                    code: "764146007".to_string(),
                    display: Some("Penicillin".to_string()),
                }],
                text: None,
            },
            reaction: AllergyReaction {
                code: CodeableConcept::text("Hives"),
                severity: "moderate".to_string(),
            },
        };

        let stored = encrypt_record(&allergy, &key).unwrap();
        assert!(stored.contains_key("encrypted_type"));
        assert_eq!(stored["recorder_id"], "nurse-4");

        let restored: Allergy = decrypt_record(&stored, &dek_of(&key)).unwrap();
        assert_eq!(restored, allergy);
    }

    #[test]
    fn test_typed_coverage_keeps_numbers() {
        let key = key(Domain::Financial);
        let coverage = Coverage {
            id: Some("cov-1".to_string()),
            beneficiary_id: Some("res-1".to_string()),
            status: "active".to_string(),
            coverage_type: Some("NHIS".to_string()),
            payor: Payor { id: "org-1".to_string(), organization: Some("NHIS".to_string()) },
            period: Some(Period { start: Some("2024-01-01".to_string()), end: None }),
            policy_number: None,
            plan_name: Some("Gold".to_string()),
            relationship: Some("self".to_string()),
            cost_to_beneficiary: Some(1250.5),
            authored_on: None,
        };

        let stored = encrypt_record(&coverage, &key).unwrap();
        let restored: Coverage = decrypt_record(&stored, &dek_of(&key)).unwrap();
        assert_eq!(restored, coverage);
    }

    #[test]
    fn test_typed_charge_and_payment() {
        let key = key(Domain::Financial);
        let charge = Charge {
            id: None,
            resident_id: Some("res-1".to_string()),
            service: "Laundry".to_string(),
            code: None,
            quantity: 2,
            unit_price: Money { value: 1500.0, currency: "NGN".to_string() },
            occurrence_datetime: None,
            description: Some("Weekly".to_string()),
        };
        let stored = encrypt_record(&charge, &key).unwrap();
        assert_eq!(decrypt_record::<Charge>(&stored, &dek_of(&key)).unwrap(), charge);

        let payment = Payment {
            id: None,
            resident_id: None,
            claim_id: Some("claim-1".to_string()),
            coverage_id: None,
            amount: Money { value: 3000.0, currency: "NGN".to_string() },
            payor: "NHIS".to_string(),
            occurrence_datetime: Some("2024-04-02T10:00:00Z".to_string()),
            method: Some("EFT".to_string()),
        };
        let stored = encrypt_record(&payment, &key).unwrap();
        assert_eq!(stored["claim_id"], "claim-1");
        assert_eq!(decrypt_record::<Payment>(&stored, &dek_of(&key)).unwrap(), payment);
    }

    #[test]
    fn test_typed_emergency_contact() {
        let key = key(Domain::Contact);
        let contact = EmergencyContact {
            id: None,
            resident_id: Some("res-1".to_string()),
            contact_name: Some("Ada Obi".to_string()),
            cell_phone: "+234 803 555 0100".to_string(),
            work_phone: None,
            home_phone: None,
            relationship: vec!["daughter".to_string(), "power-of-attorney".to_string()],
        };

        let stored = encrypt_record(&contact, &key).unwrap();
        assert!(!stored.contains_key("encrypted_work_phone"));
        let restored: EmergencyContact = decrypt_record(&stored, &dek_of(&key)).unwrap();
        assert_eq!(restored, contact);
    }

    #[test]
    fn test_decrypt_into_wrong_shape_is_schema_violation() {
        let key = key(Domain::Financial);
        let payment = serde_json::json!({"amount": "lots", "payor": "NHIS"});
        let Value::Object(map) = payment else { unreachable!() };
        let stored = to_encrypted_record(RecordKind::Payment, &map, &key).unwrap();

        let result = decrypt_record::<Payment>(&stored, &dek_of(&key));
        assert!(matches!(result, Err(Error::SchemaViolation(_))));
    }
}
