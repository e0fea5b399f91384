use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use trendsink_adapters::FixtureTrendSource;
use trendsink_core::{Normalized, NormalizedRow, RunOutcome, SHEET_HEADER};
use trendsink_sync::{Pipeline, PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "trendsink")]
#[command(about = "Push Google Trends trending searches into BigQuery and Google Sheets")]
struct Cli {
    /// Replay a captured batchexecute response instead of calling Google Trends.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline once and exit.
    Run,
    /// Serve `GET /` on $PORT, plus cron runs when TRENDSINK_SCHEDULE is set.
    Serve,
    /// Fetch and normalize without writing anywhere.
    Preview,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish()
        .try_init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;
    let mut pipeline = Pipeline::from_config(config)?;
    if let Some(path) = cli.fixture {
        pipeline = pipeline.with_source(Box::new(FixtureTrendSource::new(path)));
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let outcome = pipeline.run_today().await;
            match &outcome {
                RunOutcome::Success { inserted_rows } => {
                    println!("run complete: status=success inserted_rows={inserted_rows}");
                }
                RunOutcome::Warning { message } => println!("run complete: status=warning {message}"),
                RunOutcome::Error { message } => {
                    eprintln!("run failed: {message}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Serve => trendsink_web::serve(Arc::new(pipeline)).await?,
        Commands::Preview => match pipeline.preview(Local::now().date_naive()).await? {
            Normalized::Empty => println!("no trends fetched"),
            Normalized::Rows(rows) => print!("{}", render_table(&rows)),
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn render_table(rows: &[NormalizedRow]) -> String {
    let cells = rows
        .iter()
        .map(|r| [r.trend_date.to_string(), r.keyword.clone(), r.value.to_string()])
        .collect::<Vec<_>>();
    let mut widths = SHEET_HEADER.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = format!(
        "{:<w0$}  {:<w1$}  {:>w2$}\n",
        SHEET_HEADER[0],
        SHEET_HEADER[1],
        SHEET_HEADER[2],
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2]
    );
    for [date, keyword, value] in cells {
        out.push_str(&format!(
            "{date:<w0$}  {keyword:<w1$}  {value:>w2$}\n",
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        ));
    }
    out
}
