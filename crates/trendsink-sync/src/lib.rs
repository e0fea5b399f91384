//! Pipeline orchestration. A run fetches trending searches, normalizes them, appends
//! them to the warehouse table and then overwrites the spreadsheet mirror.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use trendsink_adapters::{AdapterError, GoogleTrendsSource, TrendSource};
use trendsink_core::{normalize, NormalizeError, Normalized, NormalizedRow, RunOutcome, SHEET_HEADER};
use trendsink_storage::{
    BigQueryWarehouse, GoogleSheetsMirror, HttpClientConfig, HttpFetcher, MirrorError, RowInsertError,
    ServiceAccountTokens, SpreadsheetMirror, TableRef, WarehouseError, WarehouseSink,
};
use uuid::Uuid;

pub const NO_TRENDS_MESSAGE: &str = "No trends fetched.";
pub const DEFAULT_LOCALE: &str = "US";
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {var}")]
    Missing { var: &'static str },
    #[error("invalid value {value:?} for environment variable {var}")]
    Invalid { var: &'static str, value: String },
}

/// Everything a run needs, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub table: TableRef,
    pub locale: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub credentials_path: PathBuf,
    pub port: u16,
    pub schedule: Option<String>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());
        let required = |var: &'static str| optional(var).ok_or(ConfigError::Missing { var });
        let parsed = |var: &'static str, default| match optional(var) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid { var, value }),
            None => Ok(default),
        };

        let port = parsed("PORT", u64::from(DEFAULT_PORT))?;
        let port = u16::try_from(port).map_err(|_| ConfigError::Invalid {
            var: "PORT",
            value: port.to_string(),
        })?;

        Ok(Self {
            table: TableRef {
                project: required("PROJECT_ID")?,
                dataset: required("DATASET")?,
                table: required("TABLE")?,
            },
            locale: optional("LOCALE").unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            spreadsheet_id: required("SPREADSHEET_ID")?,
            sheet_name: optional("SHEET_NAME").unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
            credentials_path: PathBuf::from(required("GOOGLE_APPLICATION_CREDENTIALS")?),
            port,
            schedule: optional("TRENDSINK_SCHEDULE"),
            http_timeout_secs: parsed("TRENDSINK_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            user_agent: optional("TRENDSINK_USER_AGENT")
                .unwrap_or_else(|| format!("trendsink/{}", env!("CARGO_PKG_VERSION"))),
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch trending searches: {0}")]
    Fetch(#[source] AdapterError),
    #[error("failed to normalize trends: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("warehouse write failed: {0}")]
    Warehouse(#[from] WarehouseError),
    #[error("BigQuery insert errors for {table}: {}", join_insert_errors(.errors))]
    Insert {
        table: String,
        errors: Vec<RowInsertError>,
    },
    #[error("spreadsheet update failed: {0}")]
    Mirror(#[from] MirrorError),
}

fn join_insert_errors(errors: &[RowInsertError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Terminal states of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completed {
    Empty,
    Written(usize),
}

pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn TrendSource>,
    warehouse: Box<dyn WarehouseSink>,
    mirror: Box<dyn SpreadsheetMirror>,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn TrendSource>,
        warehouse: Box<dyn WarehouseSink>,
        mirror: Box<dyn SpreadsheetMirror>,
    ) -> Self {
        Self {
            config,
            source,
            warehouse,
            mirror,
            run_lock: Mutex::new(()),
        }
    }

    /// Wire the live Google Trends, BigQuery and Sheets clients.
    pub fn from_config(config: PipelineConfig) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })
        .context("building http client")?;
        let tokens = Arc::new(ServiceAccountTokens::new(config.credentials_path.clone()));
        let source = GoogleTrendsSource::new(http.clone());
        let warehouse = BigQueryWarehouse::new(http.clone(), tokens.clone());
        let mirror = GoogleSheetsMirror::new(http, tokens);
        Ok(Self::new(
            config,
            Box::new(source),
            Box::new(warehouse),
            Box::new(mirror),
        ))
    }

    pub fn with_source(mut self, source: Box<dyn TrendSource>) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run against the local calendar date.
    pub async fn run_today(&self) -> RunOutcome {
        self.run_once(Local::now().date_naive()).await
    }

    /// Execute one run. At most one run is in flight per pipeline; later callers wait.
    pub async fn run_once(&self, run_date: NaiveDate) -> RunOutcome {
        let _running = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, locale = %self.config.locale, %run_date);

        match self.execute(run_date).instrument(span).await {
            Ok(Completed::Empty) => {
                warn!(%run_id, "no trends fetched");
                RunOutcome::Warning {
                    message: NO_TRENDS_MESSAGE.to_string(),
                }
            }
            Ok(Completed::Written(inserted_rows)) => RunOutcome::Success { inserted_rows },
            Err(err) => {
                error!(%run_id, error = %err, "pipeline run failed");
                RunOutcome::Error {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Fetch and normalize without touching either sink.
    pub async fn preview(&self, run_date: NaiveDate) -> Result<Normalized, PipelineError> {
        let records = self
            .source
            .fetch(&self.config.locale)
            .await
            .map_err(PipelineError::Fetch)?;
        Ok(normalize(&records, run_date)?)
    }

    async fn execute(&self, run_date: NaiveDate) -> Result<Completed, PipelineError> {
        let rows = match self.preview(run_date).await? {
            Normalized::Empty => return Ok(Completed::Empty),
            Normalized::Rows(rows) => rows,
        };
        info!(source = self.source.source_id(), rows = rows.len(), "normalized trending searches");

        self.write_warehouse(&rows).await?;
        // The warehouse rows are committed from here on; a mirror failure does not undo them.
        self.mirror
            .publish(
                &self.config.spreadsheet_id,
                &self.config.sheet_name,
                &SHEET_HEADER,
                &rows,
            )
            .await?;
        info!(
            sheet = %self.config.sheet_name,
            rows = rows.len(),
            "pushed rows to spreadsheet"
        );

        Ok(Completed::Written(rows.len()))
    }

    async fn write_warehouse(&self, rows: &[NormalizedRow]) -> Result<(), PipelineError> {
        let table = &self.config.table;
        self.warehouse
            .ensure_target(&table.project, &table.dataset)
            .await?;
        let errors = self.warehouse.insert(table, rows).await?;
        if !errors.is_empty() {
            return Err(PipelineError::Insert {
                table: table.to_string(),
                errors,
            });
        }
        info!(%table, rows = rows.len(), "inserted rows into warehouse");
        Ok(())
    }
}

/// Cron-driven runs for long-lived processes; `None` when no schedule is configured.
pub async fn maybe_build_scheduler(pipeline: Arc<Pipeline>) -> anyhow::Result<Option<JobScheduler>> {
    let Some(cron) = pipeline.config().schedule.clone() else {
        return Ok(None);
    };

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            let outcome = pipeline.run_today().await;
            info!(status = outcome.status(), "scheduled run finished");
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
