//! Paper records built from spreadsheet rows.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Sentinel for a missing or empty field
pub const NOT_AVAILABLE: &str = "N/A";

/// Column names that may hold the citation count, in lookup order
pub const CITATION_COLUMNS: &[&str] = &[
    "Times Cited",
    "Times Cited, All Databases",
    "Citation Count",
    "Citations",
];

/// Bibliographic fields of one paper, in column order.
///
/// Values are trimmed; empty values are stored as [`NOT_AVAILABLE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperRecord {
    fields: Vec<(String, String)>,
}

impl PaperRecord {
    /// Build a record from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| {
                let value = v.as_ref().trim();
                let value = if value.is_empty() { NOT_AVAILABLE } else { value };
                (k.into(), value.to_string())
            })
            .collect();
        Self { fields }
    }

    /// Value of `name`, or `"N/A"` when the field is absent
    pub fn get(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or(NOT_AVAILABLE)
    }

    /// Whether the record carries a real (non-sentinel) value for `name`
    pub fn has(&self, name: &str) -> bool {
        self.get(name) != NOT_AVAILABLE
    }

    pub fn title(&self) -> &str {
        self.get("Title")
    }

    pub fn abstract_text(&self) -> &str {
        self.get("Abstract")
    }

    pub fn authors(&self) -> &str {
        self.get("Authors")
    }

    pub fn publication_year(&self) -> &str {
        self.get("Publication Year")
    }

    /// First populated citation column, see [`CITATION_COLUMNS`]
    pub fn citation_count(&self) -> &str {
        CITATION_COLUMNS
            .iter()
            .map(|c| self.get(c))
            .find(|v| *v != NOT_AVAILABLE)
            .unwrap_or(NOT_AVAILABLE)
    }
}

// Serialized as a JSON object in column order for request logging
impl Serialize for PaperRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_normalizes() {
        let record = PaperRecord::from_pairs(vec![
            ("Title", "  Gamified learning "),
            ("Abstract", ""),
            ("Authors", "   "),
        ]);
        assert_eq!(record.title(), "Gamified learning");
        assert_eq!(record.abstract_text(), "N/A");
        assert_eq!(record.authors(), "N/A");
        assert_eq!(record.publication_year(), "N/A");
        assert!(record.has("Title"));
        assert!(!record.has("Abstract"));
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"Title":"Gamified learning","Abstract":"N/A","Authors":"N/A"}"#
        );
    }

    #[test]
    fn test_citation_count_lookup() {
        let record = PaperRecord::from_pairs(vec![
            ("Times Cited", ""),
            ("Times Cited, All Databases", "42"),
        ]);
        assert_eq!(record.citation_count(), "42");
        assert_eq!(PaperRecord::default().citation_count(), "N/A");
    }

    #[test]
    fn test_serialize_keeps_order() {
        let record = PaperRecord::from_pairs(vec![("Title", "T"), ("Abstract", "A")]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"Title":"T","Abstract":"A"}"#);
    }
}
