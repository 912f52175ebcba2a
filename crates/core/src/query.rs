use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fields::FieldName;

/// Fields a caller may ask about. A superset of [`FieldName`]: some are only
/// ever populated from the record directory, never from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    Name,
    Father,
    Aadhar,
    Gender,
    Blood,
    Address,
    Hospital,
    Phone,
    Disease,
    Medicines,
    Bed,
    Amount,
    Charges,
}

impl QueryField {
    pub const ALL: [QueryField; 13] = [
        QueryField::Name,
        QueryField::Father,
        QueryField::Aadhar,
        QueryField::Gender,
        QueryField::Blood,
        QueryField::Address,
        QueryField::Hospital,
        QueryField::Phone,
        QueryField::Disease,
        QueryField::Medicines,
        QueryField::Bed,
        QueryField::Amount,
        QueryField::Charges,
    ];

    pub fn key(self) -> &'static str {
        match self {
            QueryField::Name => "name",
            QueryField::Father => "father",
            QueryField::Aadhar => "aadhar",
            QueryField::Gender => "gender",
            QueryField::Blood => "blood",
            QueryField::Address => "address",
            QueryField::Hospital => "hospital",
            QueryField::Phone => "phone",
            QueryField::Disease => "disease",
            QueryField::Medicines => "medicines",
            QueryField::Bed => "bed",
            QueryField::Amount => "amount",
            QueryField::Charges => "charges",
        }
    }

    /// The document field backing this query, if the extractor produces one.
    pub fn extracted_as(self) -> Option<FieldName> {
        match self {
            QueryField::Name => Some(FieldName::Name),
            QueryField::Gender => Some(FieldName::Gender),
            QueryField::Blood => Some(FieldName::Blood),
            QueryField::Address => Some(FieldName::Address),
            QueryField::Phone => Some(FieldName::Phone),
            QueryField::Disease => Some(FieldName::Disease),
            QueryField::Medicines => Some(FieldName::Medicines),
            _ => None,
        }
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for QueryField {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        let wanted = match wanted.as_str() {
            "medication" | "medications" => "medicines",
            other => other,
        };
        QueryField::ALL
            .into_iter()
            .find(|f| f.key() == wanted)
            .ok_or_else(|| {
                let valid: Vec<_> = QueryField::ALL.iter().map(|f| f.key()).collect();
                format!("Invalid field name '{s}'. Valid fields: {}", valid.join(", "))
            })
    }
}

crate::re!(re_record_id, r"^[A-Za-z0-9-]+$");

/// Identifiers are alphanumeric with hyphens, nothing else.
pub fn validate_record_id(id: &str) -> bool {
    re_record_id().is_match(id)
}
