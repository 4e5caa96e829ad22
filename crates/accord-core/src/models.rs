use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AgreementError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyDetails {
    pub address: Option<String>,
    pub name: Option<String>,
    pub valid_id: Option<String>,
    pub country: Option<String>,
    pub id_type: Option<String>,
    pub signature: Option<String>,
}

/// A legal agreement between two parties. File fields hold storage paths
/// relative to the media root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: i64,
    pub access_token: Uuid,
    pub content: String,
    pub email: Option<String>,
    pub agreement_id: Option<i64>,
    pub agreement_type: Option<String>,
    pub first_party: PartyDetails,
    pub second_party: PartyDetails,
    pub created_at: DateTime<Utc>,
}

impl Agreement {
    pub fn value(&self, field: AgreementField) -> Option<String> {
        use AgreementField::*;

        match field {
            Content => Some(self.content.clone()),
            Email => self.email.clone(),
            AgreementId => self.agreement_id.map(|value| value.to_string()),
            AgreementType => self.agreement_type.clone(),
            FirstPartyAddress => self.first_party.address.clone(),
            FirstPartyName => self.first_party.name.clone(),
            FirstPartyValidId => self.first_party.valid_id.clone(),
            FirstPartyCountry => self.first_party.country.clone(),
            FirstPartyIdType => self.first_party.id_type.clone(),
            FirstPartySignature => self.first_party.signature.clone(),
            SecondPartyAddress => self.second_party.address.clone(),
            SecondPartyName => self.second_party.name.clone(),
            SecondPartyValidId => self.second_party.valid_id.clone(),
            SecondPartyCountry => self.second_party.country.clone(),
            SecondPartyIdType => self.second_party.id_type.clone(),
            SecondPartySignature => self.second_party.signature.clone(),
        }
    }

    /// Applies resolved changes in place. File uploads must already have been
    /// stored and replaced with their paths.
    pub fn apply(&mut self, changes: &FieldChanges) {
        use AgreementField::*;

        for (field, value) in changes.iter() {
            let text = match value {
                FieldValue::Text(text) | FieldValue::Stored(text) => Some(text.clone()),
                FieldValue::Integer(number) => Some(number.to_string()),
                FieldValue::Null => None,
                FieldValue::Upload(_) => continue,
            };

            match field {
                Content => {
                    if let Some(text) = text {
                        self.content = text;
                    }
                }
                Email => self.email = text,
                AgreementId => {
                    self.agreement_id = match value {
                        FieldValue::Integer(number) => Some(*number),
                        _ => None,
                    }
                }
                AgreementType => self.agreement_type = text,
                FirstPartyAddress => self.first_party.address = text,
                FirstPartyName => self.first_party.name = text,
                FirstPartyValidId => self.first_party.valid_id = text,
                FirstPartyCountry => self.first_party.country = text,
                FirstPartyIdType => self.first_party.id_type = text,
                FirstPartySignature => self.first_party.signature = text,
                SecondPartyAddress => self.second_party.address = text,
                SecondPartyName => self.second_party.name = text,
                SecondPartyValidId => self.second_party.valid_id = text,
                SecondPartyCountry => self.second_party.country = text,
                SecondPartyIdType => self.second_party.id_type = text,
                SecondPartySignature => self.second_party.signature = text,
            }
        }
    }

    pub fn is_signed_by_second_party(&self) -> bool {
        self.second_party
            .signature
            .as_deref()
            .is_some_and(|path| !path.is_empty())
    }
}

/// Length of the `email` column.
pub const EMAIL_MAX_LEN: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text { max_len: Option<usize>, required: bool },
    Email,
    Integer,
    File { upload_to: &'static str },
}

/// Every client-writable column of an agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgreementField {
    Content,
    Email,
    AgreementId,
    AgreementType,
    FirstPartyAddress,
    FirstPartyName,
    FirstPartyValidId,
    FirstPartyCountry,
    FirstPartyIdType,
    FirstPartySignature,
    SecondPartyAddress,
    SecondPartyName,
    SecondPartyValidId,
    SecondPartyCountry,
    SecondPartyIdType,
    SecondPartySignature,
}

impl AgreementField {
    pub const ALL: [AgreementField; 16] = [
        AgreementField::Content,
        AgreementField::Email,
        AgreementField::AgreementId,
        AgreementField::AgreementType,
        AgreementField::FirstPartyAddress,
        AgreementField::FirstPartyName,
        AgreementField::FirstPartyValidId,
        AgreementField::FirstPartyCountry,
        AgreementField::FirstPartyIdType,
        AgreementField::FirstPartySignature,
        AgreementField::SecondPartyAddress,
        AgreementField::SecondPartyName,
        AgreementField::SecondPartyValidId,
        AgreementField::SecondPartyCountry,
        AgreementField::SecondPartyIdType,
        AgreementField::SecondPartySignature,
    ];

    /// Wire name used in JSON bodies, form fields and the database column.
    pub fn as_str(self) -> &'static str {
        use AgreementField::*;

        match self {
            Content => "content",
            Email => "email",
            AgreementId => "agreement_id",
            AgreementType => "agreementType",
            FirstPartyAddress => "first_party_address",
            FirstPartyName => "first_party_name",
            FirstPartyValidId => "first_party_valid_id",
            FirstPartyCountry => "first_party_country",
            FirstPartyIdType => "first_party_id_type",
            FirstPartySignature => "first_party_signature",
            SecondPartyAddress => "second_party_address",
            SecondPartyName => "second_party_name",
            SecondPartyValidId => "second_party_valid_id",
            SecondPartyCountry => "second_party_country",
            SecondPartyIdType => "second_party_id_type",
            SecondPartySignature => "second_party_signature",
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            AgreementField::AgreementType => "agreement_type",
            other => other.as_str(),
        }
    }

    pub fn kind(self) -> FieldKind {
        use AgreementField::*;

        match self {
            Content => FieldKind::Text {
                max_len: None,
                required: true,
            },
            FirstPartyAddress => FieldKind::Text {
                max_len: Some(100),
                required: true,
            },
            SecondPartyAddress => FieldKind::Text {
                max_len: Some(100),
                required: false,
            },
            FirstPartyName | SecondPartyName => FieldKind::Text {
                max_len: Some(200),
                required: false,
            },
            AgreementType | FirstPartyCountry | FirstPartyIdType | SecondPartyCountry
            | SecondPartyIdType => FieldKind::Text {
                max_len: Some(300),
                required: false,
            },
            Email => FieldKind::Email,
            AgreementId => FieldKind::Integer,
            FirstPartyValidId | SecondPartyValidId => FieldKind::File {
                upload_to: "valid_ids",
            },
            FirstPartySignature | SecondPartySignature => FieldKind::File {
                upload_to: "signatures",
            },
        }
    }

    pub fn is_required(self) -> bool {
        matches!(self.kind(), FieldKind::Text { required: true, .. })
    }

    pub fn required_fields() -> impl Iterator<Item = AgreementField> {
        Self::ALL.into_iter().filter(|field| field.is_required())
    }
}

impl fmt::Display for AgreementField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgreementField {
    type Err = ();

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let field = match name {
            "agreement_type" => AgreementField::AgreementType,
            "first_party_fullname" => AgreementField::FirstPartyName,
            "second_party_fullname" => AgreementField::SecondPartyName,
            other => {
                return AgreementField::ALL
                    .into_iter()
                    .find(|field| field.as_str() == other)
                    .ok_or(());
            }
        };

        Ok(field)
    }
}

/// A file received from the client, not yet written to storage.
#[derive(Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Raw value as it arrived in a request body, before field validation.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmittedValue {
    Text(String),
    Json(serde_json::Value),
    File(Upload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Null,
    Upload(Upload),
    /// Path of a file already written to storage.
    Stored(String),
}

/// Validated per-field changes for one write operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldChanges {
    values: BTreeMap<AgreementField, FieldValue>,
}

impl FieldChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a submitted payload. Unknown and read-only keys are skipped;
    /// every field error is reported together.
    pub fn parse<I>(entries: I) -> Result<Self, AgreementError>
    where
        I: IntoIterator<Item = (String, SubmittedValue)>,
    {
        let mut changes = Self::new();
        let mut errors = Vec::new();

        for (name, submitted) in entries {
            let Ok(field) = name.parse::<AgreementField>() else {
                continue;
            };

            match parse_value(field, submitted) {
                Ok(value) => {
                    changes.values.insert(field, value);
                }
                Err(message) => errors.push(format!("{field}: {message}")),
            }
        }

        if errors.is_empty() {
            Ok(changes)
        } else {
            Err(AgreementError::Validation(errors.join("; ")))
        }
    }

    pub fn with(mut self, field: AgreementField, value: FieldValue) -> Self {
        self.values.insert(field, value);
        self
    }

    pub fn set(&mut self, field: AgreementField, value: FieldValue) {
        self.values.insert(field, value);
    }

    pub fn get(&self, field: AgreementField) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn contains(&self, field: AgreementField) -> bool {
        self.values.contains_key(&field)
    }

    pub fn remove(&mut self, field: AgreementField) -> Option<FieldValue> {
        self.values.remove(&field)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(AgreementField) -> bool) {
        self.values.retain(|field, _| keep(*field));
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgreementField, &FieldValue)> {
        self.values.iter().map(|(field, value)| (*field, value))
    }

    pub fn fields(&self) -> impl Iterator<Item = AgreementField> + '_ {
        self.values.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Fields carrying a client file that still has to be stored.
    pub fn uploads(&self) -> impl Iterator<Item = (AgreementField, &Upload)> {
        self.values.iter().filter_map(|(field, value)| match value {
            FieldValue::Upload(upload) => Some((*field, upload)),
            _ => None,
        })
    }

    /// Checks that every required field is present with a value.
    pub fn require_complete(&self) -> Result<(), AgreementError> {
        let missing: Vec<String> = AgreementField::required_fields()
            .filter(|field| !self.contains(*field))
            .map(|field| format!("{field}: This field is required."))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgreementError::Validation(missing.join("; ")))
        }
    }
}

fn parse_value(field: AgreementField, submitted: SubmittedValue) -> Result<FieldValue, String> {
    let text = match submitted {
        SubmittedValue::File(upload) => {
            return match field.kind() {
                FieldKind::File { .. } if upload.file_name.trim().is_empty() => {
                    Err("The submitted file has no name.".to_string())
                }
                FieldKind::File { .. } if upload.bytes.is_empty() => {
                    Err("The submitted file is empty.".to_string())
                }
                FieldKind::File { .. } => Ok(FieldValue::Upload(upload)),
                _ => Err("Expected a text value, got a file.".to_string()),
            };
        }
        SubmittedValue::Text(text) => Some(text),
        SubmittedValue::Json(serde_json::Value::Null) => None,
        SubmittedValue::Json(serde_json::Value::String(text)) => Some(text),
        SubmittedValue::Json(serde_json::Value::Number(number)) => Some(number.to_string()),
        SubmittedValue::Json(serde_json::Value::Bool(flag)) => Some(flag.to_string()),
        SubmittedValue::Json(_) => return Err("Unsupported value type.".to_string()),
    };

    let text = text.filter(|text| !text.trim().is_empty());

    match field.kind() {
        FieldKind::Text { max_len, required } => match text {
            None if required => Err("This field may not be blank.".to_string()),
            None => Ok(FieldValue::Null),
            Some(text) => {
                let text = text.trim().to_string();
                if let Some(max_len) = max_len {
                    if text.chars().count() > max_len {
                        return Err(format!(
                            "Ensure this field has no more than {max_len} characters."
                        ));
                    }
                }
                Ok(FieldValue::Text(text))
            }
        },
        FieldKind::Email => match text {
            None => Ok(FieldValue::Null),
            Some(text) => {
                let trimmed = text.trim();
                if trimmed.chars().count() > EMAIL_MAX_LEN {
                    return Err(format!(
                        "Ensure this field has no more than {EMAIL_MAX_LEN} characters."
                    ));
                }
                lettre::Address::from_str(trimmed)
                    .map(|_| FieldValue::Text(trimmed.to_string()))
                    .map_err(|_| "Enter a valid email address.".to_string())
            }
        },
        FieldKind::Integer => match text {
            None => Ok(FieldValue::Null),
            Some(text) => text
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| "A valid integer is required.".to_string()),
        },
        FieldKind::File { .. } => match text {
            None => Ok(FieldValue::Null),
            Some(_) => Err("The submitted data was not a file.".to_string()),
        },
    }
}
