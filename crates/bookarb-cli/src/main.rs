//! `bookarb`: estimate and run metered book-data jobs from the command line.
//!
//! Output is JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value as JsonValue};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bookarb_core::{DiscoveryConfig, ScoringConfig};
use bookarb_runtime::{ArbitrageRuntime, JobError, ProviderRegistry, RuntimeConfig};

#[derive(Parser)]
#[command(name = "bookarb")]
#[command(version, about = "Budget-aware lookups against a metered book data provider")]
struct Cli {
    /// YAML runtime configuration (defaults apply when omitted)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview the token cost of a job without spending anything
    Estimate(JobArgs),

    /// Run a job and print its results
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Scoring parameters as inline JSON, passed through to the scorer
        #[arg(long)]
        scoring: Option<String>,
    },

    /// Report provider, circuit, budget and cache state
    Health,

    /// List provider types this build can construct
    Providers,
}

#[derive(Args)]
struct JobArgs {
    /// Job profile (e.g. quick, standard, deep)
    #[arg(long, short, default_value = "standard")]
    profile: String,

    /// Identifiers (ASIN, ISBN-10 or ISBN-13)
    identifiers: Vec<String>,

    /// File with one identifier per line; `#` starts a comment
    #[arg(long)]
    ids_file: Option<PathBuf>,

    /// Discovery filters as inline JSON
    #[arg(long)]
    query: Option<String>,

    /// Upper bound on identifiers discovered by `--query`
    #[arg(long, default_value_t = 10)]
    max_results: u32,
}

impl JobArgs {
    fn discovery(&self) -> Result<DiscoveryConfig> {
        let mut identifiers = self.identifiers.clone();
        if let Some(path) = &self.ids_file {
            identifiers.extend(read_ids(path)?);
        }

        let mut discovery = DiscoveryConfig::from_identifiers(identifiers);
        if let Some(query) = &self.query {
            let filters = parse_json("--query", query)?;
            discovery = discovery.with_query(filters, self.max_results);
        }

        if discovery.seed_identifiers.is_empty() && discovery.query.is_none() {
            anyhow::bail!("nothing to do: pass identifiers, --ids-file or --query");
        }
        Ok(discovery)
    }
}

fn read_ids(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading identifiers from {}", path.display()))?;
    Ok(parse_ids(&content))
}

fn parse_ids(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_json(flag: &str, raw: &str) -> Result<JsonValue> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON", flag))
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn build_runtime(path: Option<&Path>) -> Result<ArbitrageRuntime> {
    let config = load_config(path)?;
    ArbitrageRuntime::builder()
        .config(config)
        .build()
        .context("building runtime")
}

fn list_providers() -> Result<ExitCode> {
    print_json(&provider_listing(&ProviderRegistry::with_defaults()))?;
    Ok(ExitCode::SUCCESS)
}

fn provider_listing(registry: &ProviderRegistry) -> JsonValue {
    registry
        .describe()
        .into_iter()
        .map(|(kind, description)| json!({ "type": kind, "description": description }))
        .collect()
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn job_error_json(error: &JobError) -> JsonValue {
    match error {
        JobError::Rejected(rejection) => json!({
            "error": error.code(),
            "message": error.to_string(),
            "detail": rejection,
        }),
        _ => json!({
            "error": error.code(),
            "message": error.to_string(),
        }),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = match cli.command {
        Commands::Providers => return list_providers(),
        command => command,
    };

    let runtime = build_runtime(cli.config.as_deref())?;
    let code = execute(&runtime, command).await;
    runtime.shutdown();
    code
}

async fn execute(runtime: &ArbitrageRuntime, command: Commands) -> Result<ExitCode> {
    let code = match command {
        Commands::Estimate(job) => {
            let discovery = job.discovery()?;
            let estimate = runtime.estimate_cost_for(&job.profile, &discovery);
            let safe = estimate.safe_to_proceed;
            print_json(&estimate)?;
            if safe {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Commands::Run { job, scoring } => {
            let discovery = job.discovery()?;
            let scoring = match scoring {
                Some(raw) => ScoringConfig(parse_json("--scoring", &raw)?),
                None => ScoringConfig::default(),
            };

            match runtime.run_job(&job.profile, &discovery, &scoring).await {
                Ok(result) => {
                    print_json(&result)?;
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    print_json(&job_error_json(&error))?;
                    ExitCode::from(2)
                }
            }
        }
        Commands::Health => {
            let report = runtime.health().await;
            let healthy = report.is_healthy();
            print_json(&report)?;
            if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Providers => return list_providers(),
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookarb_core::JobRejection;

    #[test]
    fn test_parse_ids_skips_comments_and_blanks() {
        let ids = parse_ids("0441172717\n\n# wishlist\nB00B7NPRY8  # kindle\n");
        assert_eq!(ids, vec!["0441172717", "B00B7NPRY8"]);
    }

    #[test]
    fn test_discovery_requires_work() {
        let args = JobArgs {
            profile: "standard".into(),
            identifiers: vec![],
            ids_file: None,
            query: None,
            max_results: 10,
        };
        assert!(args.discovery().is_err());
    }

    #[test]
    fn test_discovery_with_query() {
        let args = JobArgs {
            profile: "standard".into(),
            identifiers: vec!["0441172717".into()],
            ids_file: None,
            query: Some(r#"{"category": "books"}"#.into()),
            max_results: 30,
        };
        let discovery = args.discovery().unwrap();
        assert_eq!(discovery.seed_identifiers, vec!["0441172717"]);
        assert_eq!(discovery.query.unwrap().max_results, 30);
    }

    #[test]
    fn test_rejection_json_carries_detail() {
        let error = JobError::Rejected(JobRejection::InsufficientBudget {
            balance: 30,
            required: 50,
        });
        let value = job_error_json(&error);
        assert_eq!(value["error"], "INSUFFICIENT_TOKENS");
        assert_eq!(value["detail"]["required"], 50);
    }

    #[test]
    fn test_provider_listing() {
        let listing = provider_listing(&ProviderRegistry::with_defaults());
        assert_eq!(listing[0]["type"], "fixture");
        assert_eq!(listing[1]["type"], "http");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["bookarb", "-v", "run", "--profile", "deep", "0441172717"])
            .unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Commands::Run { .. }));
    }
}
