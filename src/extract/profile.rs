//! YAML site profiles.
//!
//! A profile tells the generic extractor where the fields of one shop live.
//! Example:
//!
//! ```yaml
//! source: Keramogranit_ru
//! dataset: KeramogranitRu
//! identity:
//!   field: name
//!   selector: div.page-title
//! fields:
//!   - name: price
//!     selector: span.cat-price__cur
//!     kind: decimal
//!   - name: old_price
//!     selector: del.cat-price__del
//!     kind: decimal
//!     fallback: price
//! attributes:
//!   container: div.cat-article-params
//!   key: dt
//!   value: dd
//! ```

use crate::error::ProfileError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SiteProfile {
    /// Value written into every record's `source` field.
    pub source: String,
    /// Default dataset name used in file names.
    pub dataset: String,
    pub identity: IdentitySpec,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub attributes: Option<AttributeTableSpec>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IdentitySpec {
    /// Record key for the product name.
    #[serde(default = "default_identity_field")]
    pub field: String,
    pub selector: String,
}

fn default_identity_field() -> String {
    "name".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub kind: ValueKind,
    /// Read this attribute instead of the element text.
    #[serde(default)]
    pub attr: Option<String>,
    /// Copy another (earlier) field's outcome when this one is absent.
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Text,
    Integer,
    Decimal,
}

/// A key/value table such as `<dl><dt>Format</dt><dd>60x60</dd></dl>`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AttributeTableSpec {
    pub container: String,
    pub key: String,
    pub value: String,
}

impl SiteProfile {
    pub fn from_yaml(yaml: &str) -> Result<Self, ProfileError> {
        let profile: SiteProfile = serde_yaml::from_str(yaml)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let profile = Self::from_yaml(&yaml)?;
        info!(path = %path.display(), source = %profile.source, fields = profile.fields.len(), "Loaded site profile");
        Ok(profile)
    }

    fn validate(&self) -> Result<(), ProfileError> {
        if self.source.trim().is_empty() {
            return Err(ProfileError::Invalid("`source` must not be empty".into()));
        }
        if self.dataset.trim().is_empty() || self.dataset.contains(['/', '\\']) {
            return Err(ProfileError::Invalid(format!(
                "`dataset` must be a plain file-name fragment, got {:?}",
                self.dataset
            )));
        }

        let mut seen = HashSet::new();
        seen.insert(self.identity.field.as_str());
        for field in &self.fields {
            if let Some(fallback) = &field.fallback {
                if !seen.contains(fallback.as_str()) {
                    return Err(ProfileError::Invalid(format!(
                        "field `{}` falls back to `{}`, which is not declared before it",
                        field.name, fallback
                    )));
                }
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ProfileError::Invalid(format!(
                    "field `{}` declared twice",
                    field.name
                )));
            }
        }
        Ok(())
    }
}
