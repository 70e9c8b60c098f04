// SPDX-License-Identifier: Apache-2.0

//! fedsql: run SQL scripts against a federation of backends.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use fedsql::config::FederationConfig;
use fedsql::engine::DriverRegistry;
use fedsql::federation::FedConnection;
use fedsql::observability;
use fedsql::script::{run_script, ScriptReport};
use fedsql::FedResult;

#[derive(Parser)]
#[command(name = "fedsql")]
#[command(about = "Present several SQL backends as one logical database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (human, json)
    #[arg(long, global = true, value_enum, default_value = "human")]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute SQL script files statement by statement
    Run {
        /// Script files, executed in order on one connection
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Federation configuration (JSON). Defaults to in-memory SQLite backends.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of in-memory backends when no configuration is given
        #[arg(long, default_value_t = 3)]
        backends: usize,
        /// Disable auto-commit; the scripts drive COMMIT and ROLLBACK
        #[arg(long, default_value_t = false)]
        manual_commit: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Serialize)]
struct FileReport<'a> {
    file: String,
    #[serde(flatten)]
    report: &'a ScriptReport,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            files,
            config,
            backends,
            manual_commit,
        } => match run(files, config, backends, manual_commit, cli.output).await {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::from(1),
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::from(2)
            }
        },
    }
}

/// Returns whether every statement of every file succeeded
async fn run(
    files: Vec<PathBuf>,
    config_path: Option<PathBuf>,
    backends: usize,
    manual_commit: bool,
    output: OutputFormat,
) -> FedResult<bool> {
    let mut config = match config_path {
        Some(path) => FederationConfig::load(path)?,
        None => FederationConfig::in_memory(backends),
    };
    if manual_commit {
        config.auto_commit = false;
    }
    observability::init_tracing(&config.log);

    let registry = DriverRegistry::with_defaults();
    let connection = FedConnection::connect(&config, &registry).await?;

    let mut all_succeeded = true;
    for file in &files {
        let script = match tokio::fs::read_to_string(file).await {
            Ok(script) => script,
            Err(e) => {
                let _ = connection.close().await;
                return Err(fedsql::FedError::config(format!(
                    "Failed to read {}: {}",
                    file.display(),
                    e
                )));
            }
        };

        let report = run_script(&connection, &script).await;
        all_succeeded &= report.failed == 0;
        print_report(file, &report, output);
    }

    connection.close().await?;
    Ok(all_succeeded)
}

fn print_report(file: &std::path::Path, report: &ScriptReport, output: OutputFormat) {
    match output {
        OutputFormat::Human => {
            let rule = "*".repeat(75);
            println!("{}", rule);
            println!("Executing script file '{}' ...", file.display());
            println!("{}", rule);
            print!("{}", report.render());
            println!("{}", rule);
        }
        OutputFormat::Json => {
            let body = FileReport {
                file: file.display().to_string(),
                report,
            };
            match serde_json::to_string_pretty(&body) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to serialize report: {}", e),
            }
        }
    }
}
