//! # Batchiller Operator CLI
//!
//! Runs the batch-job system in the foreground or triggers a single job or
//! pipeline from the command line. Jobs and pipelines come from the manifests in
//! the configured jobs directory.
//!
//! Exit codes: 0 when the outcome succeeded, 1 otherwise.

use batchiller_core::config::{BatchillerConfig, ConfigManager};
use batchiller_core::logging::init_structured_logging;
use batchiller_core::models::Parameters;
use batchiller_core::{BatchillerSystem, LoggingEventListener};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "batchiller")]
#[command(about = "Batch job orchestration with hot-swappable job bundles")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration directory (default: $BATCHILLER_CONFIG_DIR or ./config)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Environment override (default: $BATCHILLER_ENV, $APP_ENV or development)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the system and run until Ctrl-C
    Serve,

    /// Run one job and print its outcome
    RunJob {
        name: String,

        /// Job parameter as key=value; values are parsed as JSON when possible
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Run one pipeline and print its outcome
    RunPipeline {
        name: String,

        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Load and validate configuration, then print it
    CheckConfig,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(format!("parameter key must not be blank in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn load_config(cli: &Cli) -> Result<(BatchillerConfig, String), String> {
    let manager = match &cli.environment {
        Some(environment) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        }
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .map_err(|error| error.to_string())?;
    Ok((manager.config().clone(), manager.environment().to_string()))
}

fn main() {
    let cli = Cli::parse();

    let (config, environment) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(error) => {
            eprintln!("❌ Configuration error: {error}");
            process::exit(1);
        }
    };

    if let Commands::CheckConfig = cli.command {
        match serde_json::to_string_pretty(&config) {
            Ok(rendered) => {
                println!("✅ Configuration valid for environment '{environment}'");
                println!("{rendered}");
                process::exit(0);
            }
            Err(error) => {
                eprintln!("❌ Cannot render configuration: {error}");
                process::exit(1);
            }
        }
    }

    init_structured_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("batchiller-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("❌ Cannot start runtime: {error}");
            process::exit(1);
        }
    };

    let code = runtime.block_on(run(cli.command, config));
    process::exit(code);
}

async fn run(command: Commands, config: BatchillerConfig) -> i32 {
    let system = match BatchillerSystem::new(config) {
        Ok(system) => system,
        Err(error) => {
            error!(error = %error, "Failed to build system");
            return 1;
        }
    };
    system
        .engine()
        .add_event_listener(Arc::new(LoggingEventListener::default()));

    if let Err(error) = system.start().await {
        error!(error = %error, "Failed to start system");
        return 1;
    }

    let code = match command {
        Commands::Serve => {
            info!("Serving; press Ctrl-C to stop");
            if let Err(error) = tokio::signal::ctrl_c().await {
                error!(error = %error, "Cannot listen for Ctrl-C");
            }
            0
        }
        Commands::RunJob { name, params } => {
            let parameters: Parameters = params.into_iter().collect();
            let outcome = system.trigger_job(&name, parameters, "cli").await;
            print_json(&outcome);
            i32::from(!outcome.is_success())
        }
        Commands::RunPipeline { name, params } => {
            let parameters: Parameters = params.into_iter().collect();
            match system.trigger_pipeline(&name, parameters, "cli").await {
                Ok(outcome) => {
                    print_json(&outcome);
                    i32::from(!outcome.success)
                }
                Err(error) => {
                    eprintln!("❌ {error}");
                    1
                }
            }
        }
        Commands::CheckConfig => 0,
    };

    system.shutdown().await;
    code
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(error) => eprintln!("cannot render result: {error}"),
    }
}
