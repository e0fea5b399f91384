//! Google Sheets mirror: every publish replaces the worksheet's visible content.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;
use trendsink_core::NormalizedRow;

use crate::auth::{CredentialError, TokenProvider, SPREADSHEETS_SCOPE};
use crate::HttpFetcher;

pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("spreadsheet {0} not found")]
    SpreadsheetNotFound(String),
    #[error("worksheet {sheet_name:?} not found in spreadsheet {spreadsheet_id}")]
    WorksheetNotFound {
        spreadsheet_id: String,
        sheet_name: String,
    },
    #[error("sheets request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sheets returned http {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid sheets url: {0}")]
    Url(String),
}

#[async_trait]
pub trait SpreadsheetMirror: Send + Sync {
    /// Clear `sheet_name` and write `header` followed by `rows` from the first cell.
    async fn publish(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        header: &[&str],
        rows: &[NormalizedRow],
    ) -> Result<(), MirrorError>;
}

/// Header row followed by one row per record, in header column order.
pub fn sheet_grid(header: &[&str], rows: &[NormalizedRow]) -> Vec<Vec<Value>> {
    let mut grid = Vec::with_capacity(rows.len() + 1);
    grid.push(header.iter().map(|h| json!(h)).collect());
    for row in rows {
        grid.push(vec![
            json!(row.trend_date.to_string()),
            json!(row.keyword),
            json!(row.value),
        ]);
    }
    grid
}

/// A1-notation sheet reference, quoted so titles with spaces or quotes survive.
fn quoted_sheet(sheet_name: &str) -> String {
    format!("'{}'", sheet_name.replace('\'', "''"))
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[allow(dead_code)]
    sheet_id: Option<i64>,
    title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    range: String,
    major_dimension: &'static str,
    values: Vec<Vec<Value>>,
}

pub struct GoogleSheetsMirror {
    http: HttpFetcher,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
}

impl GoogleSheetsMirror {
    pub fn new(http: HttpFetcher, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_url(http, tokens, SHEETS_BASE_URL)
    }

    pub fn with_base_url(
        http: HttpFetcher,
        tokens: Arc<dyn TokenProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, spreadsheet_id: &str, tail: &[&str]) -> Result<Url, MirrorError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| MirrorError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| MirrorError::Url(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id])
            .extend(tail);
        Ok(url)
    }

    async fn resolve_worksheet(
        &self,
        token: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<(), MirrorError> {
        let mut url = self.endpoint(spreadsheet_id, &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let resp = self.http.client().get(url.clone()).bearer_auth(token).send().await?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(MirrorError::SpreadsheetNotFound(spreadsheet_id.to_string()))
            }
            s => {
                return Err(MirrorError::Status {
                    status: s.as_u16(),
                    url: url.to_string(),
                })
            }
        }
        let meta: SpreadsheetMeta = resp.json().await?;
        if meta.sheets.iter().any(|s| s.properties.title == sheet_name) {
            Ok(())
        } else {
            Err(MirrorError::WorksheetNotFound {
                spreadsheet_id: spreadsheet_id.to_string(),
                sheet_name: sheet_name.to_string(),
            })
        }
    }

    async fn clear(&self, token: &str, spreadsheet_id: &str, sheet_name: &str) -> Result<(), MirrorError> {
        let range = format!("{}:clear", quoted_sheet(sheet_name));
        let url = self.endpoint(spreadsheet_id, &["values", &range])?;
        let resp = self
            .http
            .client()
            .post(url.clone())
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        ensure_success(resp.status(), &url)
    }

    async fn write_grid(
        &self,
        token: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
        values: Vec<Vec<Value>>,
    ) -> Result<(), MirrorError> {
        let range = format!("{}!A1", quoted_sheet(sheet_name));
        let mut url = self.endpoint(spreadsheet_id, &["values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = ValueRange {
            range,
            major_dimension: "ROWS",
            values,
        };
        let resp = self
            .http
            .client()
            .put(url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        ensure_success(resp.status(), &url)
    }
}

fn ensure_success(status: StatusCode, url: &Url) -> Result<(), MirrorError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(MirrorError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SpreadsheetMirror for GoogleSheetsMirror {
    async fn publish(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        header: &[&str],
        rows: &[NormalizedRow],
    ) -> Result<(), MirrorError> {
        let token = self.tokens.access_token(&[SPREADSHEETS_SCOPE]).await?;
        self.resolve_worksheet(&token, spreadsheet_id, sheet_name).await?;
        self.clear(&token, spreadsheet_id, sheet_name).await?;
        self.write_grid(&token, spreadsheet_id, sheet_name, sheet_grid(header, rows))
            .await?;
        info!(spreadsheet_id, sheet_name, rows = rows.len(), "worksheet replaced");
        Ok(())
    }
}
