//! Records and the field schema they are normalised against.
//!
//! A [`Record`] is one household member read off a register page: an
//! insertion-ordered map of field name → string value. Which fields exist is
//! not hard-coded; it is described by a [`RecordSchema`] so the same
//! pipeline works for register layouts with or without, say, a house-number
//! column.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One extracted entity. Field order follows the agent output (or the schema
/// after [`RecordSchema::normalize`]).
pub type Record = IndexMap<String, String>;

/// Placeholder written for fields an agent did not report.
pub const DEFAULT_PLACEHOLDER: &str = "-";

/// One column of the register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// JSON key the agents are asked to emit, e.g. `father_husband_name`.
    pub key: String,
    /// Short human-readable column header, e.g. `Father/Husband`.
    pub label: String,
}

impl FieldSpec {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// The set of fields every extracted record must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub fields: Vec<FieldSpec>,
    /// Value used for missing fields.
    pub placeholder: String,
    /// Keys the verification pass is asked to double-check
    /// (spelling, dates, identifiers).
    pub verify_fields: Vec<String>,
}

impl Default for RecordSchema {
    /// The household register layout: house number, member name,
    /// father/husband name, gender, caste, date of birth, occupation,
    /// literacy.
    fn default() -> Self {
        Self {
            fields: vec![
                FieldSpec::new("house_no", "House No."),
                FieldSpec::new("name", "Name"),
                FieldSpec::new("father_husband_name", "Father/Husband"),
                FieldSpec::new("gender", "Gender"),
                FieldSpec::new("caste", "Caste"),
                FieldSpec::new("dob", "DOB"),
                FieldSpec::new("occupation", "Occ."),
                FieldSpec::new("literacy", "Lit."),
            ],
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            verify_fields: vec![
                "house_no".to_string(),
                "name".to_string(),
                "father_husband_name".to_string(),
                "dob".to_string(),
            ],
        }
    }
}

impl RecordSchema {
    /// Build a schema from bare keys; labels default to the keys.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<FieldSpec> = keys
            .into_iter()
            .map(|k| {
                let k = k.into();
                FieldSpec::new(k.clone(), k)
            })
            .collect();
        Self {
            verify_fields: Vec::new(),
            fields,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn with_verify_fields<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verify_fields = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.label.as_str())
    }

    /// Reorder `record` to schema order and fill every missing (or blank)
    /// schema field with the placeholder. Keys outside the schema are kept
    /// after the schema fields.
    pub fn normalize(&self, mut record: Record) -> Record {
        let mut out = Record::with_capacity(self.fields.len().max(record.len()));
        for key in self.keys() {
            let value = match record.shift_remove(key) {
                Some(v) if !v.trim().is_empty() => v,
                _ => self.placeholder.clone(),
            };
            out.insert(key.to_string(), value);
        }
        out.extend(record);
        out
    }

    pub fn normalize_all(&self, records: Vec<Record>) -> Vec<Record> {
        records.into_iter().map(|r| self.normalize(r)).collect()
    }

    /// Values of `record` in schema order, defaulting missing keys to the
    /// placeholder. Used by output formatting.
    pub fn row<'a>(&'a self, record: &'a Record) -> Vec<&'a str> {
        self.keys()
            .map(|k| record.get(k).map(String::as_str).unwrap_or(&self.placeholder))
            .collect()
    }
}

/// Build a [`Record`] from `(key, value)` pairs.
pub fn record<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_missing_fields_in_schema_order() {
        let schema = RecordSchema::from_keys(["name", "gender", "dob"]);
        let r = record([("dob", "01-01-1990"), ("name", "Ram")]);
        let n = schema.normalize(r);
        let keys: Vec<&str> = n.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "gender", "dob"]);
        assert_eq!(n["gender"], "-");
        assert_eq!(n["dob"], "01-01-1990");
    }

    #[test]
    fn normalize_keeps_unknown_keys_last() {
        let schema = RecordSchema::from_keys(["name"]);
        let n = schema.normalize(record([("remarks", "migrated"), ("name", "Sita")]));
        let keys: Vec<&str> = n.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "remarks"]);
    }

    #[test]
    fn blank_values_become_placeholder() {
        let schema = RecordSchema::from_keys(["caste"]).with_placeholder("N/A");
        let n = schema.normalize(record([("caste", "  ")]));
        assert_eq!(n["caste"], "N/A");
    }

    #[test]
    fn row_defaults_at_point_of_use() {
        let schema = RecordSchema::default();
        let r = record([("name", "Geeta")]);
        let row = schema.row(&r);
        assert_eq!(row.len(), 8);
        assert_eq!(row[1], "Geeta");
        assert_eq!(row[0], "-");
    }

    #[test]
    fn default_schema_has_household_fields() {
        let schema = RecordSchema::default();
        let keys: Vec<&str> = schema.keys().collect();
        assert!(keys.contains(&"house_no"));
        assert!(keys.contains(&"literacy"));
        assert_eq!(schema.placeholder, DEFAULT_PLACEHOLDER);
    }
}
