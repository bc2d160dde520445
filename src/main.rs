//! chunkforge CLI
//!
//! Recipe-driven conversion of archival datasets into chunked stores.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chunkforge::config::{CacheConfig, ExecutionConfig, SourceConfig, TargetConfig};
use chunkforge::{build_recipe, build_runtime, run, translate, Config};

#[derive(Parser)]
#[command(name = "chunkforge")]
#[command(about = "Convert archival datasets into chunked stores", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conversion pipeline (default if no command specified)
    Run,

    /// Print the execution plan without processing
    Plan,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.concurrency)?;
        }

        Some(Commands::Plan) => {
            plan_command(cli.config)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn run_command(config_path: PathBuf, concurrency: Option<usize>) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;

    // Apply overrides
    if let Some(c) = concurrency {
        config.execution.concurrency = c;
    }

    config.validate()?;

    // Build and run Tokio runtime
    let runtime = build_runtime(config.execution.worker_threads)?;
    runtime.block_on(async { run(config).await })?;

    Ok(())
}

fn plan_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;

    let recipe = Arc::new(build_recipe(&config, None)?);
    let plan = translate(recipe)?;

    for (idx, pipeline) in plan.pipelines().iter().enumerate() {
        println!(
            "Pipeline {} ({} stages, {} invocations):",
            idx,
            pipeline.len(),
            pipeline.total_invocations()
        );
        for stage in pipeline.stages() {
            match stage.keys() {
                Some(keys) => println!("  {:<16} mapped over {} key(s)", stage.name(), keys.len()),
                None => println!("  {:<16} singleton", stage.name()),
            }
        }
    }

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    println!("Target: {}", config.target.path_display());
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let config = sample_config();
    std::fs::write(&output, config.to_yaml()?)?;
    println!("Sample configuration written to {}", output.display());
    Ok(())
}

fn sample_config() -> Config {
    Config {
        source: SourceConfig {
            bucket: Some("my-archive-bucket".to_string()),
            local_path: None,
            region: "us-east-1".to_string(),
            anonymous: true,
            inputs: vec![
                "dataset/part-000.bin".to_string(),
                "dataset/part-001.bin".to_string(),
            ],
            record_bytes: 1024,
            records_per_input: 1024,
        },
        cache: CacheConfig {
            enabled: true,
            bucket: None,
            local_path: Some("/tmp/chunkforge-cache".to_string()),
            prefix: Some("staged".to_string()),
            block_cache_gb: 1.0,
        },
        target: TargetConfig {
            local_path: Some("/tmp/chunkforge-out".to_string()),
            bucket: None,
            prefix: None,
            records_per_chunk: 4096,
        },
        execution: ExecutionConfig::default(),
    }
}
