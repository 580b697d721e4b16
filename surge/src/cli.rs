use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a plain-text summary.
    HumanReadable,
    /// Emit JSON progress lines and a final summary object (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "surge",
    author,
    version,
    about = "Staged load testing with threshold gating",
    long_about = "surge drives a population of virtual users through a staged load profile, records request metrics and gates the run on pass/fail thresholds.\n\nThe profile is a YAML document describing stages, thresholds, custom metrics and the endpoints each virtual user requests.",
    after_help = "Examples:\n  surge run profiles/spike.yaml\n  surge run profiles/spike.yaml --base-url http://127.0.0.1:3000\n  BASE_URL=https://staging.example.com surge run profiles/soak.yaml --output json"
)]
pub struct Cli {
    /// Log filter (e.g. info, surge_core=debug). Defaults to RUST_LOG, then `warn`.
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load profile
    #[command(
        long_about = "Run a YAML load profile.\n\nThe exit code reflects the threshold verdict: 0 when every threshold passed, 11 when any failed."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the profile (.yaml)
    pub profile: PathBuf,

    /// Target base URL (overrides `baseUrl` in the profile)
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// How often the controller reconciles virtual users (e.g. 1s, 250ms)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
