//! Processed index: the set of identity urls already in the store.
//!
//! This is the only cross-run deduplication mechanism. It is derived from
//! the loaded store at the start of a run and never mutated on its own.

use crate::models::{ExtractedRecord, Target};
use itertools::Itertools;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct ProcessedIndex {
    urls: HashSet<String>,
}

impl ProcessedIndex {
    /// Collect the identity url of every record, skipping records without one.
    pub fn build(records: &[ExtractedRecord]) -> Self {
        let urls: HashSet<String> = records
            .iter()
            .filter_map(|r| r.url().map(str::to_string))
            .collect();
        info!(processed = urls.len(), "Built processed index");
        Self { urls }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Targets not yet in the store, in frontier order.
    ///
    /// Repeated urls within the frontier are kept once (first occurrence).
    pub fn filter(&self, frontier: Vec<Target>) -> Vec<Target> {
        frontier
            .into_iter()
            .filter(|t| !self.contains(&t.url))
            .unique_by(|t| t.url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> ExtractedRecord {
        ExtractedRecord::from(value.as_object().cloned().unwrap())
    }

    fn targets(urls: &[&str]) -> Vec<Target> {
        urls.iter().map(|u| Target::new(*u, "tiles")).collect()
    }

    #[test]
    fn test_build_skips_records_without_identity() {
        let records = vec![
            record(json!({"url": "https://s.test/a"})),
            record(json!({"name": "orphan"})),
            record(json!({"url": null})),
            record(json!({"url": "https://s.test/a"})),
        ];
        let index = ProcessedIndex::build(&records);
        assert_eq!(index.len(), 1);
        assert!(index.contains("https://s.test/a"));
    }

    #[test]
    fn test_filter_preserves_order() {
        let records = vec![
            record(json!({"url": "https://s.test/a"})),
            record(json!({"url": "https://s.test/c"})),
        ];
        let index = ProcessedIndex::build(&records);
        let remaining = index.filter(targets(&[
            "https://s.test/a",
            "https://s.test/b",
            "https://s.test/c",
            "https://s.test/d",
        ]));
        let urls: Vec<&str> = remaining.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://s.test/b", "https://s.test/d"]);
    }

    #[test]
    fn test_filter_drops_repeated_frontier_lines() {
        let index = ProcessedIndex::default();
        let remaining = index.filter(targets(&[
            "https://s.test/b",
            "https://s.test/d",
            "https://s.test/b",
        ]));
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].url, "https://s.test/b");
        assert_eq!(remaining[1].url, "https://s.test/d");
    }
}
