//! BigQuery streaming-insert sink.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use trendsink_core::NormalizedRow;

use crate::auth::{CredentialError, TokenProvider, BIGQUERY_SCOPE};
use crate::HttpFetcher;

pub const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com";

/// Fully qualified warehouse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// One row the warehouse refused during a streaming insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowInsertError {
    pub index: usize,
    pub reason: String,
    pub message: String,
}

impl fmt::Display for RowInsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {} ({})", self.index, self.message, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("dataset {project}.{dataset} not found")]
    DatasetNotFound { project: String, dataset: String },
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("bigquery request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bigquery returned http {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid bigquery url: {0}")]
    Url(String),
}

#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Fail with `DatasetNotFound` unless `project.dataset` exists.
    async fn ensure_target(&self, project: &str, dataset: &str) -> Result<(), WarehouseError>;

    /// Append `rows`, returning the per-row rejections (empty on full success).
    async fn insert(
        &self,
        table: &TableRef,
        rows: &[NormalizedRow],
    ) -> Result<Vec<RowInsertError>, WarehouseError>;
}

pub struct BigQueryWarehouse {
    http: HttpFetcher,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct InsertAllRequest<'a> {
    kind: &'static str,
    rows: Vec<InsertAllRow<'a>>,
}

#[derive(Debug, Serialize)]
struct InsertAllRow<'a> {
    json: &'a NormalizedRow,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorEntry {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl BigQueryWarehouse {
    pub fn new(http: HttpFetcher, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_url(http, tokens, BIGQUERY_BASE_URL)
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

    fn endpoint(&self, segments: &[&str]) -> Result<Url, WarehouseError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| WarehouseError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| WarehouseError::Url(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["bigquery", "v2"])
            .extend(segments);
        Ok(url)
    }

    async fn bearer(&self) -> Result<String, WarehouseError> {
        Ok(self.tokens.access_token(&[BIGQUERY_SCOPE]).await?)
    }
}

fn flatten_insert_errors(response: InsertAllResponse) -> Vec<RowInsertError> {
    response
        .insert_errors
        .into_iter()
        .flat_map(|entry| {
            let index = entry.index;
            if entry.errors.is_empty() {
                return vec![RowInsertError {
                    index,
                    reason: "unknown".into(),
                    message: "row rejected without detail".into(),
                }];
            }
            entry
                .errors
                .into_iter()
                .map(|e| RowInsertError {
                    index,
                    reason: e.reason,
                    message: e.message,
                })
                .collect()
        })
        .collect()
}

#[async_trait]
impl WarehouseSink for BigQueryWarehouse {
    async fn ensure_target(&self, project: &str, dataset: &str) -> Result<(), WarehouseError> {
        let url = self.endpoint(&["projects", project, "datasets", dataset])?;
        let token = self.bearer().await?;
        let resp = self.http.client().get(url.clone()).bearer_auth(token).send().await?;
        match resp.status() {
            s if s.is_success() => {
                debug!(project, dataset, "dataset exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(WarehouseError::DatasetNotFound {
                project: project.to_string(),
                dataset: dataset.to_string(),
            }),
            s => Err(WarehouseError::Status {
                status: s.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn insert(
        &self,
        table: &TableRef,
        rows: &[NormalizedRow],
    ) -> Result<Vec<RowInsertError>, WarehouseError> {
        let url = self.endpoint(&[
            "projects",
            &table.project,
            "datasets",
            &table.dataset,
            "tables",
            &table.table,
            "insertAll",
        ])?;
        let body = InsertAllRequest {
            kind: "bigquery#tableDataInsertAllRequest",
            rows: rows.iter().map(|json| InsertAllRow { json }).collect(),
        };
        let token = self.bearer().await?;
        let resp = self
            .http
            .client()
            .post(url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(WarehouseError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }
        let parsed: InsertAllResponse = resp.json().await?;
        let errors = flatten_insert_errors(parsed);
        info!(%table, rows = rows.len(), rejected = errors.len(), "streaming insert finished");
        Ok(errors)
    }
}
