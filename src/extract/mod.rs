//! Field extraction: turning a fetched page into named values.
//!
//! Extraction is split in two levels of failure:
//!
//! - **Record level** ([`ExtractError`]): the page has no usable identity
//!   (product name) or is otherwise useless. The target is failed.
//! - **Field level** ([`FieldOutcome`]): an optional attribute is absent or
//!   unparseable. This is a normal outcome; the field gets a sentinel and the
//!   record is kept.
//!
//! # Submodules
//!
//! - [`profile`]: YAML site profiles (selectors per field)
//! - [`selector`]: [`SelectorExtractor`](selector::SelectorExtractor), the
//!   generic CSS-selector implementation of [`Extractor`]

pub mod profile;
pub mod selector;

use crate::error::ExtractError;
use crate::models::RawPage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};

/// Marker written for values that were present but could not be parsed.
pub const ERROR_MARKER: &str = "Error";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Parses a [`RawPage`] into fields.
pub trait Extractor {
    fn extract(&self, page: &RawPage) -> Result<ExtractedFields, ExtractError>;
}

impl<T: Extractor> Extractor for &T {
    fn extract(&self, page: &RawPage) -> Result<ExtractedFields, ExtractError> {
        (**self).extract(page)
    }
}

/// Result of extracting one optional field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    Found(Value),
    /// Nothing matched, or the match was empty.
    Absent,
    /// Something matched but could not be converted; carries the raw text.
    Unparseable(String),
}

impl FieldOutcome {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldOutcome::Absent)
    }

    /// The value to persist: `null` for absent, [`ERROR_MARKER`] for unparseable.
    pub fn into_value(self) -> Value {
        match self {
            FieldOutcome::Found(v) => v,
            FieldOutcome::Absent => Value::Null,
            FieldOutcome::Unparseable(_) => Value::String(ERROR_MARKER.to_string()),
        }
    }
}

/// Everything an extractor pulled out of one page, in page order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    /// Named fields declared by the profile, identity first.
    pub fields: Vec<(String, FieldOutcome)>,
    /// Free-form key/value pairs from the characteristics table; keys vary per page.
    pub attributes: Vec<(String, FieldOutcome)>,
}

impl ExtractedFields {
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&FieldOutcome> {
        self.fields
            .iter()
            .chain(self.attributes.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Flatten into `(key, value)` pairs with sentinels applied.
    pub fn into_values(self) -> (Vec<(String, Value)>, Vec<(String, Value)>) {
        let conv = |items: Vec<(String, FieldOutcome)>| {
            items
                .into_iter()
                .map(|(k, v)| (k, v.into_value()))
                .collect::<Vec<_>>()
        };
        (conv(self.fields), conv(self.attributes))
    }
}

/// Trim and collapse internal whitespace (including NBSP) to single spaces.
pub fn clean_text(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

/// Whether a product name can serve as identity.
pub fn is_usable_identity(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name != "None"
}

/// Keep only ASCII digits and parse them, e.g. `"1 290 ₽/м²"` → `1290`.
pub fn digits_only(raw: &str) -> FieldOutcome {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.parse::<u64>() {
        Ok(n) => FieldOutcome::Found(Value::Number(n.into())),
        Err(_) => FieldOutcome::Unparseable(raw.to_string()),
    }
}

/// Parse a price-like decimal: spaces and NBSP dropped, `,` accepted as the
/// decimal separator, trailing currency/unit text ignored.
pub fn parse_decimal(raw: &str) -> FieldOutcome {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let numeric: String = compact
        .chars()
        .skip_while(|c| !c.is_ascii_digit() && *c != '-')
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let numeric = numeric.trim_end_matches('.');

    match numeric.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(n) => FieldOutcome::Found(Value::Number(n)),
        None => FieldOutcome::Unparseable(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Керамогранит \n\t 60x60\u{a0}см "), "Керамогранит 60x60 см");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn test_identity_usability() {
        assert!(is_usable_identity("Плитка Estima"));
        assert!(!is_usable_identity("  "));
        assert!(!is_usable_identity("None"));
    }

    #[test]
    fn test_digits_only() {
        assert_eq!(digits_only("1 290 ₽/м²"), FieldOutcome::Found(json!(1290)));
        assert_eq!(
            digits_only("по запросу"),
            FieldOutcome::Unparseable("по запросу".to_string())
        );
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("1 290,50 ₽"), FieldOutcome::Found(json!(1290.5)));
        assert_eq!(parse_decimal("от 999"), FieldOutcome::Found(json!(999.0)));
        assert_eq!(parse_decimal("12.\u{a0}"), FieldOutcome::Found(json!(12.0)));
        assert!(matches!(parse_decimal("—"), FieldOutcome::Unparseable(_)));
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(FieldOutcome::Absent.into_value(), Value::Null);
        assert_eq!(
            FieldOutcome::Unparseable("x".into()).into_value(),
            json!(ERROR_MARKER)
        );
        assert_eq!(FieldOutcome::Found(json!("a")).into_value(), json!("a"));
    }

    #[test]
    fn test_into_values_and_get() {
        let fields = ExtractedFields {
            fields: vec![
                ("name".into(), FieldOutcome::Found(json!("Tile"))),
                ("stock".into(), FieldOutcome::Absent),
            ],
            attributes: vec![("Format".into(), FieldOutcome::Found(json!("60x60")))],
        };
        assert_eq!(fields.get("Format"), Some(&FieldOutcome::Found(json!("60x60"))));
        assert!(fields.get("stock").unwrap().is_absent());

        let (named, attrs) = fields.into_values();
        assert_eq!(named[1], ("stock".to_string(), Value::Null));
        assert_eq!(attrs[0], ("Format".to_string(), json!("60x60")));
    }
}
