//! Generic CSS-selector extractor driven by a [`SiteProfile`].

use super::profile::{AttributeTableSpec, FieldSpec, SiteProfile, ValueKind};
use super::{clean_text, digits_only, is_usable_identity, parse_decimal};
use super::{ExtractedFields, Extractor, FieldOutcome};
use crate::error::{ExtractError, ProfileError};
use crate::models::RawPage;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

#[derive(Debug)]
struct CompiledField {
    name: String,
    selector: Selector,
    kind: ValueKind,
    attr: Option<String>,
    fallback: Option<String>,
}

#[derive(Debug)]
struct CompiledTable {
    container: Selector,
    key: Selector,
    value: Selector,
}

/// Selectors are compiled once; extraction itself never fails on a field.
#[derive(Debug)]
pub struct SelectorExtractor {
    identity_field: String,
    identity: Selector,
    fields: Vec<CompiledField>,
    table: Option<CompiledTable>,
}

fn compile(field: &str, selector: &str) -> Result<Selector, ProfileError> {
    Selector::parse(selector).map_err(|_| ProfileError::Selector {
        field: field.to_string(),
        selector: selector.to_string(),
    })
}

impl SelectorExtractor {
    pub fn from_profile(profile: &SiteProfile) -> Result<Self, ProfileError> {
        let identity = compile(&profile.identity.field, &profile.identity.selector)?;
        let fields = profile
            .fields
            .iter()
            .map(|f: &FieldSpec| {
                Ok(CompiledField {
                    name: f.name.clone(),
                    selector: compile(&f.name, &f.selector)?,
                    kind: f.kind,
                    attr: f.attr.clone(),
                    fallback: f.fallback.clone(),
                })
            })
            .collect::<Result<Vec<_>, ProfileError>>()?;
        let table = profile
            .attributes
            .as_ref()
            .map(|t: &AttributeTableSpec| {
                Ok::<_, ProfileError>(CompiledTable {
                    container: compile("attributes.container", &t.container)?,
                    key: compile("attributes.key", &t.key)?,
                    value: compile("attributes.value", &t.value)?,
                })
            })
            .transpose()?;

        Ok(Self {
            identity_field: profile.identity.field.clone(),
            identity,
            fields,
            table,
        })
    }

    fn extract_field(&self, document: &Html, field: &CompiledField) -> FieldOutcome {
        let Some(element) = document.select(&field.selector).next() else {
            return FieldOutcome::Absent;
        };
        let raw = match &field.attr {
            Some(attr) => match element.value().attr(attr) {
                Some(v) => clean_text(v),
                None => return FieldOutcome::Absent,
            },
            None => element_text(element),
        };
        if raw.is_empty() {
            return FieldOutcome::Absent;
        }
        match field.kind {
            ValueKind::Text => FieldOutcome::Found(Value::String(raw)),
            ValueKind::Integer => digits_only(&raw),
            ValueKind::Decimal => parse_decimal(&raw),
        }
    }

    fn extract_table(&self, document: &Html) -> Vec<(String, FieldOutcome)> {
        let Some(table) = &self.table else {
            return Vec::new();
        };
        let Some(container) = document.select(&table.container).next() else {
            return Vec::new();
        };
        let keys = container.select(&table.key).map(element_text);
        let values = container.select(&table.value).map(element_text);

        keys.zip(values)
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| {
                let outcome = if v.is_empty() {
                    FieldOutcome::Absent
                } else {
                    FieldOutcome::Found(Value::String(v))
                };
                (k, outcome)
            })
            .collect()
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

impl Extractor for SelectorExtractor {
    fn extract(&self, page: &RawPage) -> Result<ExtractedFields, ExtractError> {
        if page.body.trim().is_empty() {
            return Err(ExtractError::Unusable("empty body".into()));
        }
        let document = Html::parse_document(&page.body);

        let name = document
            .select(&self.identity)
            .next()
            .map(element_text)
            .unwrap_or_default();
        if !is_usable_identity(&name) {
            return Err(ExtractError::MissingIdentity {
                field: self.identity_field.clone(),
            });
        }

        let mut fields: Vec<(String, FieldOutcome)> = Vec::with_capacity(self.fields.len() + 1);
        fields.push((self.identity_field.clone(), FieldOutcome::Found(Value::String(name))));
        for field in &self.fields {
            let mut outcome = self.extract_field(&document, field);
            if outcome.is_absent() {
                if let Some(fallback) = &field.fallback {
                    if let Some((_, earlier)) = fields.iter().find(|(k, _)| k == fallback) {
                        outcome = earlier.clone();
                    }
                }
            }
            fields.push((field.name.clone(), outcome));
        }

        Ok(ExtractedFields {
            fields,
            attributes: self.extract_table(&document),
        })
    }
}
