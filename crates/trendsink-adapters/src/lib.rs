//! Trend source contracts + the Google Trends "trending now" adapter.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info};
use trendsink_core::{TrendRecord, TrendVolume};
use trendsink_storage::{FetchError, HttpFetcher};

pub const GOOGLE_TRENDS_BASE_URL: &str = "https://trends.google.com";
pub const TRENDING_NOW_RPC: &str = "i0OFE";
/// Window, in hours, of the "trending now" listing.
pub const TRENDING_NOW_HOURS: u32 = 24;
pub const TRENDING_NOW_LANGUAGE: &str = "en";

const BATCHEXECUTE_PATH: &str = "/_/TrendsUi/data/batchexecute";
const ANTI_XSSI_PREFIX: &str = ")]}'";
const KEYWORD_INDEX: usize = 0;
const VOLUME_INDEX: usize = 6;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("locale must not be empty")]
    InvalidLocale,
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("unexpected trends payload: {0}")]
    Payload(String),
    #[error("reading {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch(&self, locale: &str) -> Result<Vec<TrendRecord>, AdapterError>;
}

/// Live adapter for Google Trends' batchexecute "trending now" RPC.
pub struct GoogleTrendsSource {
    http: HttpFetcher,
    base_url: String,
}

impl GoogleTrendsSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_base_url(http, GOOGLE_TRENDS_BASE_URL)
    }

    pub fn with_base_url(http: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

fn normalize_locale(locale: &str) -> Result<String, AdapterError> {
    let locale = locale.trim();
    if locale.is_empty() {
        return Err(AdapterError::InvalidLocale);
    }
    Ok(locale.to_ascii_uppercase())
}

/// The `f.req` form value for one trending-now call.
pub fn trending_now_request(locale: &str) -> String {
    let args = json!([null, null, locale, 0, TRENDING_NOW_LANGUAGE, TRENDING_NOW_HOURS, 1]).to_string();
    json!([[[TRENDING_NOW_RPC, args, null, "generic"]]]).to_string()
}

#[async_trait]
impl TrendSource for GoogleTrendsSource {
    fn source_id(&self) -> &'static str {
        "google-trends"
    }

    async fn fetch(&self, locale: &str) -> Result<Vec<TrendRecord>, AdapterError> {
        let locale = normalize_locale(locale)?;
        let url = format!(
            "{}{}?rpcids={}",
            self.base_url.trim_end_matches('/'),
            BATCHEXECUTE_PATH,
            TRENDING_NOW_RPC
        );
        let f_req = trending_now_request(&locale);
        let resp = self.http.post_form(&url, &[("f.req", f_req.as_str())]).await?;
        let body = String::from_utf8_lossy(&resp.body);
        let records = parse_trending_now(&body)?;
        info!(locale = %locale, records = records.len(), "fetched trending searches");
        Ok(records)
    }
}

/// Replays a captured batchexecute response instead of calling Google.
#[derive(Debug, Clone)]
pub struct FixtureTrendSource {
    path: PathBuf,
}

impl FixtureTrendSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TrendSource for FixtureTrendSource {
    fn source_id(&self) -> &'static str {
        "google-trends-fixture"
    }

    async fn fetch(&self, locale: &str) -> Result<Vec<TrendRecord>, AdapterError> {
        normalize_locale(locale)?;
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| AdapterError::Fixture {
                path: self.path.clone(),
                source,
            })?;
        parse_trending_now(&body)
    }
}

/// Extract the trend records from a batchexecute response body.
pub fn parse_trending_now(body: &str) -> Result<Vec<TrendRecord>, AdapterError> {
    let payload = find_rpc_payload(body, TRENDING_NOW_RPC)?;
    let value: JsonValue = serde_json::from_str(&payload)
        .map_err(|e| AdapterError::Payload(format!("invalid rpc payload JSON: {e}")))?;

    let items = match value.get(1) {
        None | Some(JsonValue::Null) => {
            debug!("rpc payload carried no trend list");
            return Ok(Vec::new());
        }
        Some(JsonValue::Array(items)) => items,
        Some(other) => {
            return Err(AdapterError::Payload(format!(
                "expected trend list at index 1, found {other}"
            )))
        }
    };

    items.iter().enumerate().map(|(idx, item)| trend_from_item(idx, item)).collect()
}

fn find_rpc_payload(body: &str, rpc_id: &str) -> Result<String, AdapterError> {
    let trimmed = body.trim_start();
    let body = trimmed.strip_prefix(ANTI_XSSI_PREFIX).unwrap_or(trimmed);

    for line in body.lines().map(str::trim).filter(|l| l.starts_with('[')) {
        let Ok(JsonValue::Array(entries)) = serde_json::from_str::<JsonValue>(line) else {
            continue;
        };
        for entry in &entries {
            let tag = entry.get(0).and_then(JsonValue::as_str);
            let id = entry.get(1).and_then(JsonValue::as_str);
            if tag == Some("wrb.fr") && id == Some(rpc_id) {
                return entry
                    .get(2)
                    .and_then(JsonValue::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| AdapterError::Payload(format!("rpc {rpc_id} returned no payload")));
            }
        }
    }

    Err(AdapterError::Payload(format!("no wrb.fr entry for rpc {rpc_id}")))
}

fn trend_from_item(idx: usize, item: &JsonValue) -> Result<TrendRecord, AdapterError> {
    let keyword = item
        .get(KEYWORD_INDEX)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| AdapterError::Payload(format!("trend {idx} has no keyword")))?;
    let volume = match item.get(VOLUME_INDEX) {
        None | Some(JsonValue::Null) => TrendVolume::Count(0),
        Some(JsonValue::String(text)) => TrendVolume::Text(text.clone()),
        Some(JsonValue::Number(n)) => n.as_u64().map(TrendVolume::Count).ok_or_else(|| {
            AdapterError::Payload(format!("trend {keyword:?} has non-integer volume {n}"))
        })?,
        Some(other) => {
            return Err(AdapterError::Payload(format!(
                "trend {keyword:?} has unsupported volume {other}"
            )))
        }
    };
    Ok(TrendRecord {
        keyword: keyword.to_string(),
        volume,
    })
}
