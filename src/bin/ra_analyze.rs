//! Offline RA Longevity Tool
//!
//! Runs the same lifecycle as the HTTP service directly against an artifacts
//! directory: analyze a file, release a report, deploy a run or show its
//! stored integrity verdict.
//!
//! Usage:
//!   cargo run --bin ra_analyze -- analyze --input ./data.csv
//!   cargo run --bin ra_analyze -- report --run-id <RUN_ID> --format html
//!   cargo run --bin ra_analyze -- deploy --run-id <RUN_ID> --human-key <KEY> --logic-key <KEY>
//!   cargo run --bin ra_analyze -- verdict --run-id <RUN_ID>

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ra_longevity::config::{load_env, AppConfig};
use ra_longevity::longevity::pipeline::DEFAULT_MODE;
use ra_longevity::longevity::{
    ArtifactStore, DeployRequest, LongevityService, RawRow, ReportDocument, ServiceError,
};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// RA Longevity analysis, report and deployment tool
#[derive(Parser, Debug)]
#[command(name = "ra_analyze")]
#[command(about = "Run RA Longevity analyses against a local artifacts directory")]
struct Cli {
    /// Artifacts root (overrides configuration)
    #[arg(short, long, env = "RA_ARTIFACTS_DIR")]
    artifacts_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a CSV or JSON file and persist a new run
    Analyze {
        /// Input file (.csv, or .json holding an array of rows or {"data": [...]})
        #[arg(short, long)]
        input: PathBuf,

        /// Analysis mode recorded with the run
        #[arg(short, long, default_value = DEFAULT_MODE)]
        mode: String,
    },

    /// Print a run's report (blocked if its integrity verdict failed)
    Report {
        #[arg(short, long)]
        run_id: String,

        /// json or html
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Deploy a run through the two-key gate
    Deploy {
        #[arg(short, long)]
        run_id: String,

        #[arg(long)]
        human_key: String,

        #[arg(long)]
        logic_key: String,

        /// Defaults to ra_longevity_model_<run_id>
        #[arg(short, long)]
        model_name: Option<String>,
    },

    /// Show a run's stored integrity verdict
    Verdict {
        #[arg(short, long)]
        run_id: String,
    },
}

fn main() -> Result<()> {
    load_env();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.artifacts_dir {
        config.artifacts_dir = dir;
    }

    let store = ArtifactStore::new(&config.artifacts_dir).with_context(|| {
        format!(
            "Failed to open artifact store at {}",
            config.artifacts_dir.display()
        )
    })?;
    let service = LongevityService::new(Arc::new(store), config.model.clone());

    match cli.command {
        Commands::Analyze { input, mode } => {
            let outcome = if is_csv(&input) {
                let bytes = std::fs::read(&input)
                    .with_context(|| format!("Failed to read {}", input.display()))?;
                service.analyze_csv(&bytes, &mode)
            } else {
                service.analyze(read_json_rows(&input)?, &mode)
            }
            .map_err(service_error)?;

            let results = &outcome.results;
            eprintln!(
                "Run {}: {} predictions, integrity {}",
                results.run_id,
                results.predictions.len(),
                if outcome.verdict.passed() { "PASSED" } else { "FAILED" }
            );
            if results.target_source.is_synthetic() {
                eprintln!("Note: no 'target' column; predictions fit a synthetic placeholder target");
            }
            print_json(&serde_json::json!({
                "run_id": results.run_id,
                "run_dir": outcome.run_dir,
                "predictions": results.predictions,
                "ldrop_metrics": results.ldrop_metrics,
                "ra_score_deltas": results.ra_score_deltas,
                "target_source": results.target_source,
                "integrity_check": outcome.verdict.passed(),
            }))?;
        }

        Commands::Report { run_id, format } => {
            match service.get_report(&run_id, &format).map_err(service_error)? {
                ReportDocument::Json(value) => print_json(&value)?,
                ReportDocument::Html(html) => println!("{}", html),
            }
        }

        Commands::Deploy {
            run_id,
            human_key,
            logic_key,
            model_name,
        } => {
            let record = service
                .deploy(&DeployRequest {
                    run_id,
                    human_key,
                    logic_key,
                    model_name,
                })
                .map_err(service_error)?;
            eprintln!("Model {} deployed successfully", record.model_name);
            print_json(&record)?;
        }

        Commands::Verdict { run_id } => {
            let verdict = service.verdict(&run_id).map_err(service_error)?;
            print_json(&verdict)?;
        }
    }

    Ok(())
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn read_json_rows(path: &Path) -> Result<Vec<RawRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;

    let rows = match value {
        Value::Array(_) => value,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(data @ Value::Array(_)) => data,
            _ => bail!("JSON object input must carry a \"data\" array"),
        },
        _ => bail!("JSON input must be an array of rows or {{\"data\": [...]}}"),
    };
    serde_json::from_value(rows).context("Every row must be a JSON object")
}

fn service_error(e: ServiceError) -> anyhow::Error {
    anyhow!("{:?} error: {}", e.kind(), e.detail())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
