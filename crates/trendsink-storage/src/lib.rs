//! HTTP fetch utilities + Google warehouse/spreadsheet sinks for trendsink.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, Instrument};

pub mod auth;
pub mod sheets;
pub mod warehouse;

#[cfg(test)]
mod fake_google;

pub use auth::{CredentialError, ServiceAccountTokens, TokenProvider};
pub use sheets::{GoogleSheetsMirror, MirrorError, SpreadsheetMirror};
pub use warehouse::{BigQueryWarehouse, RowInsertError, TableRef, WarehouseError, WarehouseSink};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// Thin wrapper over a shared `reqwest::Client`. Requests are never retried.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// POST an urlencoded form and return the body of a 2xx response.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async { into_fetched(self.client.post(url).form(form).send().await?).await }
            .instrument(span)
            .await
    }
}

async fn into_fetched(resp: reqwest::Response) -> Result<FetchedResponse, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: resp.url().to_string(),
        });
    }
    let body = resp.bytes().await?.to_vec();
    Ok(FetchedResponse {
        status,
        body,
    })
}
