//! Data models shared by the pipeline stages.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Target`]: A unit of work (one product URL plus its dataset tag)
//! - [`RawPage`]: The fetched, unparsed body of a target
//! - [`ExtractedRecord`]: A flat, schemaless record as persisted in the store
//! - [`MonitoringStamp`]: The date/time pair written into every record
//!
//! Records are not fixed structs: different sources, and even
//! different pages of one source, expose different attribute sets.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Identity field. A record without it is useless for deduplication.
pub const URL_FIELD: &str = "url";
/// Monitoring date, `dd.mm.YYYY`.
pub const DATE_FIELD: &str = "date";
/// Monitoring time, `HH:MM`.
pub const TIME_FIELD: &str = "time";
/// Source tag (shop name) of the record.
pub const SOURCE_FIELD: &str = "source";

const WELL_KNOWN: [&str; 4] = [URL_FIELD, DATE_FIELD, TIME_FIELD, SOURCE_FIELD];

/// A single product URL to process.
///
/// Identity is the `url`; `group_key` names the dataset the target belongs
/// to and is carried for logging only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub url: String,
    pub group_key: String,
}

impl Target {
    pub fn new(url: impl Into<String>, group_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            group_key: group_key.into(),
        }
    }
}

/// A fetched page, before any parsing.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// The URL that was requested.
    pub url: String,
    /// HTTP status of the response.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// Date and time written into every record at the moment it is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringStamp {
    pub date: String,
    pub time: String,
}

impl MonitoringStamp {
    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    pub fn from_datetime(at: DateTime<Local>) -> Self {
        Self {
            date: at.format("%d.%m.%Y").to_string(),
            time: at.format("%H:%M").to_string(),
        }
    }
}

/// One persisted record: an ordered mapping from field name to scalar.
///
/// Serialises transparently as a flat JSON object, so stores written by
/// earlier runs (or other tools) round-trip without losing unknown keys.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ExtractedRecord(Map<String, Value>);

impl ExtractedRecord {
    /// Assemble a record from extracted fields and the target it came from.
    ///
    /// Layout: extracted fields first, then `url`, `date`, `time`, `source`,
    /// then any characteristics-table attributes. Extracted keys that collide with a
    /// well-known field are dropped.
    pub fn assemble(
        target: &Target,
        fields: impl IntoIterator<Item = (String, Value)>,
        attributes: impl IntoIterator<Item = (String, Value)>,
        source: &str,
        stamp: &MonitoringStamp,
    ) -> Self {
        let mut map = Map::new();
        for (key, value) in fields {
            if WELL_KNOWN.contains(&key.as_str()) {
                debug!(%key, url = %target.url, "Dropping extracted field shadowing a well-known field");
                continue;
            }
            map.insert(key, value);
        }
        map.insert(URL_FIELD.to_string(), Value::String(target.url.clone()));
        map.insert(DATE_FIELD.to_string(), Value::String(stamp.date.clone()));
        map.insert(TIME_FIELD.to_string(), Value::String(stamp.time.clone()));
        map.insert(SOURCE_FIELD.to_string(), Value::String(source.to_string()));
        for (key, value) in attributes {
            if WELL_KNOWN.contains(&key.as_str()) || map.contains_key(&key) {
                continue;
            }
            map.insert(key, value);
        }
        Self(map)
    }

    /// The identity url, if present and a non-empty string.
    pub fn url(&self) -> Option<&str> {
        self.0
            .get(URL_FIELD)
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

}

impl From<Map<String, Value>> for ExtractedRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
