//! Service-account bearer tokens shared by the BigQuery and Sheets clients.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;
use yup_oauth2::authenticator::{Authenticator, DefaultHyperClient, HyperClientBuilder};
use yup_oauth2::ServiceAccountAuthenticator;

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

type DefaultConnector = <DefaultHyperClient as HyperClientBuilder>::Connector;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("reading service account key {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("building service account authenticator: {0}")]
    Authenticator(#[source] std::io::Error),
    #[error("requesting access token: {0}")]
    Token(String),
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, scopes: &[&str]) -> Result<String, CredentialError>;
}

/// Loads the service-account key file on first use and caches the authenticator.
pub struct ServiceAccountTokens {
    key_path: PathBuf,
    authenticator: OnceCell<Authenticator<DefaultConnector>>,
}

impl ServiceAccountTokens {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            authenticator: OnceCell::new(),
        }
    }

    async fn authenticator(&self) -> Result<&Authenticator<DefaultConnector>, CredentialError> {
        self.authenticator
            .get_or_try_init(|| async {
                debug!(path = %self.key_path.display(), "loading service account key");
                let key = yup_oauth2::read_service_account_key(&self.key_path)
                    .await
                    .map_err(|source| CredentialError::Read {
                        path: self.key_path.clone(),
                        source,
                    })?;
                ServiceAccountAuthenticator::builder(key)
                    .build()
                    .await
                    .map_err(CredentialError::Authenticator)
            })
            .await
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn access_token(&self, scopes: &[&str]) -> Result<String, CredentialError> {
        let token = self
            .authenticator()
            .await?
            .token(scopes)
            .await
            .map_err(|e| CredentialError::Token(e.to_string()))?;
        token
            .token()
            .map(ToString::to_string)
            .ok_or_else(|| CredentialError::Token("token response carried no access token".into()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Hands out a fixed token and remembers which scopes were requested.
    #[derive(Default)]
    pub(crate) struct StaticToken {
        pub(crate) requested_scopes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn access_token(&self, scopes: &[&str]) -> Result<String, CredentialError> {
            self.requested_scopes
                .lock()
                .unwrap()
                .extend(scopes.iter().map(|s| s.to_string()));
            Ok(crate::fake_google::FAKE_TOKEN.to_string())
        }
    }

    /// Always fails, as a missing or malformed key file would.
    pub(crate) struct BrokenCredentials;

    #[async_trait]
    impl TokenProvider for BrokenCredentials {
        async fn access_token(&self, _scopes: &[&str]) -> Result<String, CredentialError> {
            Err(CredentialError::Token("invalid_grant".into()))
        }
    }
}
