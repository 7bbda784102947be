//! Scripted collaborators and HTML fixtures for unit tests.

use crate::error::FetchError;
use crate::extract::profile::{AttributeTableSpec, FieldSpec, IdentitySpec, SiteProfile, ValueKind};
use crate::fetch::Fetcher;
use crate::models::{ExtractedRecord, RawPage, Target};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Profile matching [`product_page`].
pub fn profile() -> SiteProfile {
    SiteProfile {
        source: "Shop".into(),
        dataset: "Tiles".into(),
        identity: IdentitySpec {
            field: "name".into(),
            selector: "h1.title".into(),
        },
        fields: vec![
            FieldSpec {
                name: "price".into(),
                selector: "span.price".into(),
                kind: ValueKind::Decimal,
                attr: None,
                fallback: None,
            },
            FieldSpec {
                name: "old_price".into(),
                selector: "del.old-price".into(),
                kind: ValueKind::Decimal,
                attr: None,
                fallback: Some("price".into()),
            },
            FieldSpec {
                name: "units".into(),
                selector: "span.units".into(),
                kind: ValueKind::Text,
                attr: None,
                fallback: None,
            },
        ],
        attributes: Some(AttributeTableSpec {
            container: "dl.specs".into(),
            key: "dt".into(),
            value: "dd".into(),
        }),
    }
}

pub fn product_page(name: &str, price: Option<&str>, old_price: Option<&str>) -> String {
    let price = price
        .map(|p| format!("<span class=\"price\">{p}</span><span class=\"units\">м²</span>"))
        .unwrap_or_default();
    let old = old_price
        .map(|p| format!("<del class=\"old-price\">{p}</del>"))
        .unwrap_or_default();
    format!(
        "<html><body><h1 class=\"title\">{name}</h1>{price}{old}\
         <dl class=\"specs\"><dt>Формат</dt><dd>60x60</dd><dt>Цвет</dt><dd>серый</dd></dl>\
         </body></html>"
    )
}

pub fn url(i: usize) -> String {
    format!("https://s.test/p/{i}")
}

/// Targets `https://s.test/p/0 .. n`.
pub fn targets(n: usize) -> Vec<Target> {
    (0..n).map(|i| Target::new(url(i), "Tiles")).collect()
}

/// `n` stored records for urls outside the `targets` range.
pub fn records(n: usize) -> Vec<ExtractedRecord> {
    (0..n)
        .map(|i| {
            let map = json!({ "name": format!("old {i}"), "url": format!("https://s.test/old/{i}") });
            ExtractedRecord::from(map.as_object().cloned().unwrap_or_default())
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Step {
    Page(String),
    Fail(FetchError),
    Hang,
}

/// Per-url scripted responses. Unknown urls fail with 404.
///
/// `fail_times` entries are consumed first, then the url's page (if any).
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, Vec<Step>>>,
    fallback: HashMap<String, Step>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: &str) -> Self {
        self.fallback.insert(url.to_string(), Step::Page(body.to_string()));
        self
    }

    pub fn fail_times(self, url: &str, times: usize, error: FetchError) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(std::iter::repeat_n(Step::Fail(error), times));
        self
    }

    pub fn hang(mut self, url: &str) -> Self {
        self.fallback.insert(url.to_string(), Step::Hang);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.get_mut(url).and_then(|steps| {
                if steps.is_empty() {
                    None
                } else {
                    Some(steps.remove(0))
                }
            })
        };
        let step = scripted.or_else(|| self.fallback.get(url).cloned());
        match step {
            Some(Step::Page(body)) => Ok(RawPage {
                url: url.to_string(),
                status: 200,
                body,
            }),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Serves a valid product page for every url after a fixed delay and
/// tracks how many fetches overlap.
#[derive(Debug)]
pub struct SlowFetcher {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Fetcher for SlowFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(RawPage {
            url: url.to_string(),
            status: 200,
            body: product_page(&format!("Tile {url}"), Some("100"), None),
        })
    }
}
