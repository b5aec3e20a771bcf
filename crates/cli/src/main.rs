// Renderpool CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: The bench harness drives the real engine over the simulated backend.

mod bench;
mod commands;
mod output;
mod telemetry;

use anyhow::Result;
use clap::{Parser, Subcommand};

use telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "renderpool")]
#[command(about = "Renderpool CLI - Inspect configuration and load-test the conversion engine")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective engine configuration
    Config {
        #[command(flatten)]
        engine: commands::EngineArgs,
    },

    /// Run a load test against the simulated worker backend
    Bench(commands::bench::BenchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(TelemetryConfig::from_env());

    let output_format = output::OutputFormat::parse(&cli.output);

    match cli.command {
        Commands::Config { engine } => commands::config::run(&engine, output_format),
        Commands::Bench(args) => commands::bench::run(args, output_format).await,
    }
}
