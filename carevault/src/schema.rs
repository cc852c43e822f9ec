//! Declarative field classification for every record kind.
//!
//! Each record kind has one table describing which fields stay in clear,
//! which are encrypted individually, and how an encrypted value is turned
//! back into JSON. The same table drives encryption, decryption and
//! validation, so the directions cannot drift apart.
//!
//! Fields named `id` or ending in `_id` are always identifiers and are never
//! listed; they pass through unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::domain::Domain;
use crate::error::{Error, Result};

/// Prefix marking an encrypted field in the stored representation.
pub const ENCRYPTED_PREFIX: &str = "encrypted_";

/// Field holding the wrapped DEK on every encrypted sub-record.
pub const DEK_FIELD: &str = "encrypted_dek";

/// True for `id` and foreign-key style `*_id` field names.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    name == "id" || name.ends_with("_id")
}

/// Stored name of an encrypted field.
#[must_use]
pub fn encrypted_name(name: &str) -> String {
    format!("{ENCRYPTED_PREFIX}{name}")
}

/// How a sensitive value is serialized before encryption and re-coerced
/// after decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A JSON string, encrypted as-is
    Text,
    /// Any JSON value, encrypted as its JSON text
    Json,
    /// An integral JSON number
    Integer,
    /// Any JSON number
    Float,
    /// A JSON boolean
    Bool,
}

impl ValueKind {
    /// True if `value` has this kind. `null` is handled by the caller.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Self::Text, Value::String(_))
            | (Self::Json, _)
            | (Self::Float, Value::Number(_))
            | (Self::Bool, Value::Bool(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }

    /// Serializes a value for encryption.
    ///
    /// Returns `None` for `null` and the empty string: such values are not
    /// stored at all.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaViolation` if the value does not have this kind.
    pub fn encode(self, value: &Value) -> Result<Option<String>> {
        match value {
            Value::Null => return Ok(None),
            Value::String(s) if s.is_empty() => return Ok(None),
            _ => {}
        }
        if !self.accepts(value) {
            return Err(Error::SchemaViolation(format!(
                "expected {self}, found {}",
                type_name(value)
            )));
        }

        let encoded = match (self, value) {
            (Self::Text, Value::String(s)) => s.clone(),
            (Self::Integer | Self::Float, Value::Number(n)) => n.to_string(),
            (Self::Bool, Value::Bool(b)) => b.to_string(),
            _ => serde_json::to_string(value)
                .map_err(|e| Error::SchemaViolation(format!("cannot serialize value: {e}")))?,
        };
        Ok(Some(encoded))
    }

    /// Re-coerces decrypted text into a JSON value of this kind.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaViolation` if the text does not parse as this
    /// kind.
    pub fn decode(self, text: &str) -> Result<Value> {
        let invalid = |detail: &str| {
            Error::SchemaViolation(format!("decrypted value is not {self}: {detail}"))
        };

        match self {
            Self::Text => Ok(Value::String(text.to_string())),
            Self::Json => serde_json::from_str(text).map_err(|e| invalid(&e.to_string())),
            Self::Integer | Self::Float => {
                let number: Number =
                    serde_json::from_str(text).map_err(|e| invalid(&e.to_string()))?;
                if self == Self::Integer && !(number.is_i64() || number.is_u64()) {
                    return Err(invalid(text));
                }
                Ok(Value::Number(number))
            }
            Self::Bool => {
                text.parse::<bool>().map(Value::Bool).map_err(|e| invalid(&e.to_string()))
            }
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "a string",
            Self::Json => "JSON",
            Self::Integer => "an integer",
            Self::Float => "a number",
            Self::Bool => "a boolean",
        })
    }
}

pub(crate) const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One encrypted sub-field of a composite field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    /// Sub-field name inside the nested object
    pub name: &'static str,
    /// Value kind of the sub-field
    pub kind: ValueKind,
    /// Whether the sub-field must be present
    pub required: bool,
}

impl Part {
    const fn new(name: &'static str, kind: ValueKind) -> Self {
        Self { name, kind, required: false }
    }

    const fn required(self) -> Self {
        Self { required: true, ..self }
    }
}

/// Classification of a top-level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// Stored in clear, copied unchanged
    Clear,
    /// Encrypted as `encrypted_<name>`
    Sensitive(ValueKind),
    /// Nested object whose `id` stays clear and whose parts are encrypted
    /// as `encrypted_<part>` inside the object
    Composite(&'static [Part]),
}

/// Classification of one named field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Plaintext field name
    pub name: &'static str,
    /// How the field is stored
    pub class: FieldClass,
    /// Whether a plaintext record must carry a non-empty value
    pub required: bool,
}

impl FieldSpec {
    const fn new(name: &'static str, class: FieldClass) -> Self {
        Self { name, class, required: false }
    }

    const fn required(self) -> Self {
        Self { required: true, ..self }
    }
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldClass::Sensitive(ValueKind::Text))
}

const fn json(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldClass::Sensitive(ValueKind::Json))
}

const fn integer(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldClass::Sensitive(ValueKind::Integer))
}

const fn float(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldClass::Sensitive(ValueKind::Float))
}

const fn boolean(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldClass::Sensitive(ValueKind::Bool))
}

const fn clear(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldClass::Clear)
}

const fn composite(name: &'static str, parts: &'static [Part]) -> FieldSpec {
    FieldSpec::new(name, FieldClass::Composite(parts))
}

/// Looks up a field by plaintext name.
#[must_use]
pub fn find_field<'a>(fields: &'a [FieldSpec], name: &str) -> Option<&'a FieldSpec> {
    fields.iter().find(|spec| spec.name == name)
}

// Composite parts

const NAMED_SUBJECT: &[Part] = &[Part::new("name", ValueKind::Text).required()];

const PAYOR: &[Part] = &[Part::new("organization", ValueKind::Text)];

const PERFORMER: &[Part] =
    &[Part::new("name", ValueKind::Text), Part::new("period", ValueKind::Json)];

// Contact domain

const EMERGENCY_CONTACT: &[FieldSpec] = &[
    text("contact_name"),
    text("cell_phone").required(),
    text("work_phone"),
    text("home_phone"),
    json("relationship"),
];

const ADDRESS: &[FieldSpec] = &[
    text("use"),
    text("type"),
    text("text"),
    json("line").required(),
    text("city"),
    text("district"),
    text("state"),
    text("postalCode"),
    text("country"),
    json("period"),
];

// General domain

const IDENTIFIER: &[FieldSpec] =
    &[text("system").required(), text("value").required(), text("type"), text("issued")];

// Financial domain

const ACCOUNT: &[FieldSpec] = &[
    composite("subject", NAMED_SUBJECT).required(),
    json("billing_status").required(),
    json("balance").required(),
    text("authored_on"),
    json("guarantor"),
    json("service_period"),
    text("updated_at"),
];

const CHARGE: &[FieldSpec] = &[
    text("service").required(),
    text("code"),
    integer("quantity").required(),
    json("unit_price").required(),
    text("occurrence_datetime"),
    text("description"),
];

const CLAIM: &[FieldSpec] = &[
    clear("charge_ids"),
    text("authored_on"),
    text("status").required(),
    json("total").required(),
    text("description"),
];

const COVERAGE: &[FieldSpec] = &[
    text("status").required(),
    text("type"),
    composite("payor", PAYOR).required(),
    json("period"),
    text("policy_number"),
    text("plan_name"),
    text("relationship"),
    json("class"),
    text("network"),
    float("cost_to_beneficiary"),
    text("authored_on"),
    text("updated_at"),
];

const PAYMENT: &[FieldSpec] = &[
    json("amount").required(),
    text("payor").required(),
    text("occurrence_datetime"),
    text("method"),
];

const ADJUSTMENT: &[FieldSpec] = &[
    text("reason").required(),
    float("approved_amount").required(),
    text("authored_on"),
    text("updated_at"),
];

const FINANCIAL_TRANSACTION: &[FieldSpec] = &[
    float("amount").required(),
    text("date").required(),
    text("type").required(),
    text("description").required(),
];

// Clinical domain

const ALLERGY: &[FieldSpec] = &[
    json("name").required(),
    text("clinical_status"),
    text("verification_status"),
    text("type"),
    text("recorded_date"),
    json("substance").required(),
    json("reaction").required(),
];

const PRESCRIPTION: &[FieldSpec] = &[
    json("period"),
    text("status").required(),
    text("adherence"),
    json("medication").required(),
    json("dosage_instruction"),
];

const OBSERVATION: &[FieldSpec] = &[
    text("status").required(),
    json("category"),
    json("code").required(),
    json("value_quantity"),
    text("effective_datetime"),
    json("body_site"),
    json("method"),
    json("device"),
];

const DIAGNOSTIC_HISTORY: &[FieldSpec] = &[
    text("clinical_status"),
    text("recorded_date"),
    text("onset_datetime"),
    text("abatement_datetime"),
    text("title").required(),
    json("coding"),
];

const EMAR: &[FieldSpec] = &[
    json("medication").required(),
    text("status").required(),
    text("effective_datetime"),
    json("dosage"),
];

const CARE_PLAN: &[FieldSpec] = &[
    clear("goal_ids"),
    text("status").required(),
    text("title").required(),
    text("created_date"),
    json("activities"),
];

const CARE_PLAN_ACTIVITY: &[FieldSpec] = &[
    json("code"),
    text("status").required(),
    json("timing"),
    composite("performer", PERFORMER),
    text("staff_instructions"),
];

const GOAL: &[FieldSpec] = &[
    text("lifecycle_status").required(),
    text("category"),
    text("priority"),
    json("description").required(),
];

const PROCEDURE: &[FieldSpec] = &[
    composite("subject", NAMED_SUBJECT),
    json("focus"),
    json("code").required(),
    text("status").required(),
    json("occurrence"),
    json("category"),
    json("body_site"),
    composite("performer", PERFORMER),
    text("notes"),
    text("outcome"),
    text("recorded_at"),
];

const TASK: &[FieldSpec] = &[
    text("activity_code"),
    text("status").required(),
    text("intent").required(),
    text("priority"),
    json("requested_period"),
    json("execution_period"),
    composite("performer", PERFORMER),
    text("notes"),
    text("outcome"),
    text("authored_on"),
    text("last_modified"),
    boolean("do_not_perform"),
];

const ENCOUNTER: &[FieldSpec] = &[
    composite("subject", NAMED_SUBJECT).required(),
    json("type"),
    text("status").required(),
    json("period"),
    json("diagnosis"),
    json("reason"),
    text("location"),
    text("participant_name"),
    text("notes"),
    text("recorded_at"),
];

const EPISODE_OF_CARE: &[FieldSpec] = &[
    clear("team_ids"),
    text("status").required(),
    json("type"),
    json("period"),
    json("diagnosis"),
    json("reason"),
    text("managing_organization"),
];

// Resident document, split by the domain whose DEK protects each field

const RESIDENT_CLEAR: &[FieldSpec] =
    &[clear("facility_id").required(), clear("created_at"), clear("deactivated_at")];

const RESIDENT_GENERAL: &[FieldSpec] = &[
    text("resident_name"),
    text("resident_code"),
    text("gender"),
    text("avatar_url"),
    text("room_no"),
];

const RESIDENT_CONTACT: &[FieldSpec] = &[
    text("resident_email"),
    text("cell_phone"),
    text("work_phone"),
    text("home_phone"),
    text("dob"),
    text("address_1"),
    text("address_2"),
];

const RESIDENT_CLINICAL: &[FieldSpec] = &[text("pcp")];

/// Resident fields stored in clear.
#[must_use]
pub const fn resident_clear_fields() -> &'static [FieldSpec] {
    RESIDENT_CLEAR
}

/// Resident fields encrypted under the given domain's DEK.
#[must_use]
pub const fn resident_fields(domain: Domain) -> &'static [FieldSpec] {
    match domain {
        Domain::General => RESIDENT_GENERAL,
        Domain::Contact => RESIDENT_CONTACT,
        Domain::Clinical => RESIDENT_CLINICAL,
        Domain::Financial => &[],
    }
}

/// Every resident field, clear and encrypted.
#[must_use]
pub fn all_resident_fields() -> Vec<FieldSpec> {
    let mut fields = RESIDENT_CLEAR.to_vec();
    for domain in Domain::ALL {
        fields.extend_from_slice(resident_fields(domain));
    }
    fields
}

/// Kind of resident sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Emergency contact person
    EmergencyContact,
    /// Postal address
    Address,
    /// External identifier (national id, insurance number)
    Identifier,
    /// Billing account
    Account,
    /// Billable charge
    Charge,
    /// Insurance claim
    Claim,
    /// Insurance coverage
    Coverage,
    /// Payment received
    Payment,
    /// Claim adjustment
    Adjustment,
    /// Ledger entry on the resident's billing history
    FinancialTransaction,
    /// Allergy or intolerance
    Allergy,
    /// Medication prescription
    Prescription,
    /// Clinical observation or vital sign
    Observation,
    /// Diagnosed condition
    DiagnosticHistory,
    /// Medication administration record
    Emar,
    /// Care plan
    CarePlan,
    /// Activity within a care plan
    CarePlanActivity,
    /// Care goal
    Goal,
    /// Performed procedure
    Procedure,
    /// Scheduled task
    Task,
    /// Encounter
    Encounter,
    /// Episode of care
    EpisodeOfCare,
}

impl RecordKind {
    /// Every record kind.
    pub const ALL: [Self; 22] = [
        Self::EmergencyContact,
        Self::Address,
        Self::Identifier,
        Self::Account,
        Self::Charge,
        Self::Claim,
        Self::Coverage,
        Self::Payment,
        Self::Adjustment,
        Self::FinancialTransaction,
        Self::Allergy,
        Self::Prescription,
        Self::Observation,
        Self::DiagnosticHistory,
        Self::Emar,
        Self::CarePlan,
        Self::CarePlanActivity,
        Self::Goal,
        Self::Procedure,
        Self::Task,
        Self::Encounter,
        Self::EpisodeOfCare,
    ];

    /// Field classification table for this kind.
    #[must_use]
    pub const fn schema(self) -> RecordSchema {
        let (collection, domain, fields) = match self {
            Self::EmergencyContact => ("emergency_contacts", Domain::Contact, EMERGENCY_CONTACT),
            Self::Address => ("addresses", Domain::Contact, ADDRESS),
            Self::Identifier => ("identifiers", Domain::General, IDENTIFIER),
            Self::Account => ("accounts", Domain::Financial, ACCOUNT),
            Self::Charge => ("charges", Domain::Financial, CHARGE),
            Self::Claim => ("claims", Domain::Financial, CLAIM),
            Self::Coverage => ("coverages", Domain::Financial, COVERAGE),
            Self::Payment => ("payments", Domain::Financial, PAYMENT),
            Self::Adjustment => ("adjustments", Domain::Financial, ADJUSTMENT),
            Self::FinancialTransaction => {
                ("financials", Domain::Financial, FINANCIAL_TRANSACTION)
            }
            Self::Allergy => ("allergies", Domain::Clinical, ALLERGY),
            Self::Prescription => ("prescriptions", Domain::Clinical, PRESCRIPTION),
            Self::Observation => ("observations", Domain::Clinical, OBSERVATION),
            Self::DiagnosticHistory => ("diagnostic_history", Domain::Clinical, DIAGNOSTIC_HISTORY),
            Self::Emar => ("emar", Domain::Clinical, EMAR),
            Self::CarePlan => ("care_plans", Domain::Clinical, CARE_PLAN),
            Self::CarePlanActivity => {
                ("care_plan_activities", Domain::Clinical, CARE_PLAN_ACTIVITY)
            }
            Self::Goal => ("goals", Domain::Clinical, GOAL),
            Self::Procedure => ("procedures", Domain::Clinical, PROCEDURE),
            Self::Task => ("tasks", Domain::Clinical, TASK),
            Self::Encounter => ("encounters", Domain::Clinical, ENCOUNTER),
            Self::EpisodeOfCare => ("episodes_of_care", Domain::Clinical, EPISODE_OF_CARE),
        };
        RecordSchema { kind: self, collection, domain, fields }
    }

    /// Storage collection name under a resident.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        self.schema().collection
    }

    /// Domain whose DEK protects records of this kind.
    #[must_use]
    pub const fn domain(self) -> Domain {
        self.schema().domain
    }

    /// Snake-case kind name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmergencyContact => "emergency_contact",
            Self::Address => "address",
            Self::Identifier => "identifier",
            Self::Account => "account",
            Self::Charge => "charge",
            Self::Claim => "claim",
            Self::Coverage => "coverage",
            Self::Payment => "payment",
            Self::Adjustment => "adjustment",
            Self::FinancialTransaction => "financial_transaction",
            Self::Allergy => "allergy",
            Self::Prescription => "prescription",
            Self::Observation => "observation",
            Self::DiagnosticHistory => "diagnostic_history",
            Self::Emar => "emar",
            Self::CarePlan => "care_plan",
            Self::CarePlanActivity => "care_plan_activity",
            Self::Goal => "goal",
            Self::Procedure => "procedure",
            Self::Task => "task",
            Self::Encounter => "encounter",
            Self::EpisodeOfCare => "episode_of_care",
        }
    }

    /// Finds the kind stored in a collection.
    #[must_use]
    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.collection() == collection)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    /// Accepts either the kind name (`allergy`) or its collection
    /// (`allergies`).
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .or_else(|| Self::from_collection(s))
            .ok_or_else(|| Error::Config(format!("unknown record kind: {s}")))
    }
}

/// Storage location, key domain and field table of one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchema {
    /// Record kind
    pub kind: RecordKind,
    /// Collection name under the resident document
    pub collection: &'static str,
    /// Domain selecting the KEK
    pub domain: Domain,
    /// Classified fields
    pub fields: &'static [FieldSpec],
}

impl RecordSchema {
    /// Looks up a field by plaintext name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        find_field(self.fields, name)
    }
}
