use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder stored for any field the extractor could not locate.
pub const NOT_FOUND: &str = "Not found";

/// The closed set of fields recovered from an uploaded document.
///
/// Declaration order is the canonical output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Name,
    Age,
    PatientId,
    Disease,
    Gender,
    Blood,
    Address,
    Phone,
    Medicines,
}

impl FieldName {
    pub const ALL: [FieldName; 9] = [
        FieldName::Name,
        FieldName::Age,
        FieldName::PatientId,
        FieldName::Disease,
        FieldName::Gender,
        FieldName::Blood,
        FieldName::Address,
        FieldName::Phone,
        FieldName::Medicines,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FieldName::Name => "name",
            FieldName::Age => "age",
            FieldName::PatientId => "patient_id",
            FieldName::Disease => "disease",
            FieldName::Gender => "gender",
            FieldName::Blood => "blood",
            FieldName::Address => "address",
            FieldName::Phone => "phone",
            FieldName::Medicines => "medicines",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for FieldName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        FieldName::ALL
            .into_iter()
            .find(|f| f.key() == wanted)
            .ok_or_else(|| format!("Unknown field: '{s}'"))
    }
}

/// Collapse every whitespace run (newlines included) into one space and trim.
pub fn normalize_value(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Field name → extracted value. Every field is always present; missing
/// values hold [`NOT_FOUND`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<FieldName, String>")]
pub struct FieldMap(BTreeMap<FieldName, String>);

impl FieldMap {
    /// A map with every field set to the sentinel.
    pub fn new() -> Self {
        Self(
            FieldName::ALL
                .into_iter()
                .map(|f| (f, NOT_FOUND.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, field: FieldName) -> &str {
        self.0.get(&field).map(String::as_str).unwrap_or(NOT_FOUND)
    }

    /// Store a normalized value. An empty value is stored as the sentinel.
    pub fn set(&mut self, field: FieldName, value: &str) {
        let value = normalize_value(value);
        let value = if value.is_empty() { NOT_FOUND.to_string() } else { value };
        self.0.insert(field, value);
    }

    pub fn is_found(&self, field: FieldName) -> bool {
        self.get(field) != NOT_FOUND
    }

    /// The record identifier, if one was extracted.
    pub fn patient_id(&self) -> Option<&str> {
        self.is_found(FieldName::PatientId)
            .then(|| self.get(FieldName::PatientId))
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldName, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl Default for FieldMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<BTreeMap<FieldName, String>> for FieldMap {
    type Error = String;
    fn try_from(values: BTreeMap<FieldName, String>) -> Result<Self, Self::Error> {
        let mut map = FieldMap::new();
        for (field, value) in values {
            map.set(field, &value);
        }
        Ok(map)
    }
}
