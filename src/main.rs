// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Sift: sort files by asking a local AI model about their names

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use sift::classifier::{build_prompt, normalize_file_name, PromptMode};
use sift::config::{AppConfig, Overrides};
use sift::console::{write_event, Flow, OutputFormat, RunReport, Session};
use sift::mover::{discover_extensions, TransferMode};
use sift::ollama::OllamaClient;
use sift::orchestrator::{format_elapsed, Orchestrator};
use sift::{Result, SiftError};

/// Sift CLI - sort files with a local AI model
#[derive(Parser, Debug)]
#[command(name = "sift")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Move or copy files whose names match a concept, judged by a local AI model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "sift.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings shared by every command that classifies
#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Folder to read files from
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Folder to move or copy matching files into
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Concept to match file names against
    #[arg(short = 'k', long)]
    concept: Option<String>,

    /// Relevance level, 0 (anything related) to 8 (exact match)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=8))]
    level: Option<u8>,

    /// Custom prompt used instead of the level phrasings
    #[arg(short, long)]
    prompt: Option<String>,

    /// File extension to include, repeatable (default: all found in source)
    #[arg(short, long = "ext")]
    extensions: Vec<String>,

    /// What to do with matching files: copy or move
    #[arg(long)]
    mode: Option<TransferMode>,

    /// Model to ask
    #[arg(short, long)]
    model: Option<String>,

    /// Inference server URL
    #[arg(long)]
    url: Option<String>,
}

impl From<RunArgs> for Overrides {
    fn from(args: RunArgs) -> Self {
        Overrides {
            url: args.url,
            model: args.model,
            source: args.source,
            destination: args.destination,
            concept: args.concept,
            level: args.level,
            custom_prompt: args.prompt,
            extensions: args.extensions,
            mode: args.mode,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify every file in the source folder once
    Run {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Interactive session with start/cancel, manual add and undo
    Session {
        #[command(flatten)]
        args: RunArgs,
    },

    /// List models available on the inference server
    Models,

    /// Show the prompt that would be sent for a file
    Prompt {
        /// File name to build the prompt for
        #[arg(default_value = "File Name")]
        file: String,

        #[command(flatten)]
        args: RunArgs,
    },

    /// List the file extensions found in a folder
    Extensions {
        /// Folder to inspect
        dir: PathBuf,
    },

    /// Show AI engine status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "sift.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format: OutputFormat = cli.format.parse().map_err(SiftError::Validation)?;

    // Load configuration
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Some(Commands::Run { args }) => run_classification(config, args, format).await,
        Some(Commands::Session { args }) => run_session(config, args, format).await,
        Some(Commands::Models) => run_models(config, format).await,
        Some(Commands::Prompt { file, args }) => run_prompt(config, args, &file),
        Some(Commands::Extensions { dir }) => run_extensions(config, &dir, format),
        Some(Commands::Status) => run_status(config).await,
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        None => {
            // Default: interactive session
            run_session(config, RunArgs::default(), format).await
        }
    }
}

fn engine_client(config: &AppConfig) -> Result<OllamaClient> {
    OllamaClient::new(
        &config.ai_engine.url,
        Duration::from_secs(config.ai_engine.timeout_secs),
    )
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, ending classification..."),
        _ = terminate => info!("Received SIGTERM, ending classification..."),
    }
}

/// One pass over the source folder
async fn run_classification(mut config: AppConfig, args: RunArgs, format: OutputFormat) -> Result<()> {
    config.apply(args.into());
    let settings = config.run_settings()?;
    let client = engine_client(&config)?;

    let mut orchestrator = Orchestrator::new(Arc::new(client));
    orchestrator.start(settings).await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut stdout = std::io::stdout();
    let mut collected = Vec::new();

    loop {
        tokio::select! {
            event = orchestrator.next_event() => match event {
                Some(event) if format == OutputFormat::Json => collected.push(event),
                Some(event) => write_event(&mut stdout, &event, format)?,
                None => break,
            },
            _ = &mut shutdown, if orchestrator.is_running() => {
                orchestrator.cancel()?;
            }
        }
    }

    match format {
        OutputFormat::Json => {
            let report = RunReport::new(&orchestrator, &collected);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Jsonl => {}
        OutputFormat::Text => {
            let ledger = orchestrator.ledger();
            println!();
            println!("Placed {} file(s):", ledger.len());
            for (name, action) in ledger.entries() {
                println!("  {} [{}] -> {}", name, action.kind, action.destination.display());
            }
            let pending = orchestrator.pending();
            if !pending.is_empty() {
                println!("Not matched ({}):", pending.len());
                for name in pending {
                    println!("  {}", name);
                }
            }
            if let Some(elapsed) = orchestrator.last_elapsed() {
                println!("Time taken: {}", format_elapsed(elapsed));
            }
        }
    }

    Ok(())
}

/// Interactive session on stdin/stdout
async fn run_session(mut config: AppConfig, args: RunArgs, format: OutputFormat) -> Result<()> {
    config.apply(args.into());
    let client = engine_client(&config)?;

    let mut session = Session::new(
        config,
        Arc::new(client.clone()),
        Some(client),
        format,
        std::io::stdout(),
    );
    session.greet()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if session.handle_line(&line).await? == Flow::Quit {
                        break;
                    }
                }
                None => break,
            },
            Some(_) = session.pump(), if session.orchestrator().run_id().is_some() => {}
        }
    }

    // Let the worker report whatever it still has
    while session.pump().await.is_some() {}

    Ok(())
}

/// List models, falling back to a placeholder entry
async fn run_models(config: AppConfig, format: OutputFormat) -> Result<()> {
    let client = engine_client(&config)?;
    let list = client.list_models_or_placeholder().await;

    match format {
        OutputFormat::Text => {
            println!("Available models:");
            for m in &list.models {
                let marker = if *m == config.ai_engine.model { "→" } else { " " };
                println!("  {} {}", marker, m);
            }
        }
        _ => println!("{}", serde_json::to_string_pretty(&list)?),
    }

    if list.error {
        warn!("Inference server at {} did not return a model list", client.base_url());
    }

    Ok(())
}

/// Preview the question for one file name
fn run_prompt(mut config: AppConfig, args: RunArgs, file: &str) -> Result<()> {
    config.apply(args.into());
    let mode = config.classification.prompt_mode()?;

    match &mode {
        PromptMode::Level { level, .. } => println!("Relevance Level: {}", level),
        PromptMode::Custom { .. } => println!("Custom prompt"),
    }
    println!("The Used Prompt: {}", build_prompt(&mode, &normalize_file_name(file)));

    Ok(())
}

/// Print the extensions a run would offer for `dir`
fn run_extensions(config: AppConfig, dir: &Path, format: OutputFormat) -> Result<()> {
    let found = discover_extensions(dir, &config.extensions.excluded)?;

    match format {
        OutputFormat::Text => {
            if found.is_empty() {
                println!("No eligible file extensions in {:?}", dir);
            }
            for ext in &found {
                println!("  {}", ext);
            }
        }
        _ => println!("{}", serde_json::to_string(&found)?),
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    let client = engine_client(&config)?;

    println!("Sift v1.0.0 Status");
    println!("==================");

    // Check Ollama
    match client.health_check().await {
        Ok(()) => println!("Ollama: Running ({})", client.base_url()),
        Err(e) => println!("Ollama: Error - {}", e),
    }

    // List models
    let list = client.list_models_or_placeholder().await;
    println!("\nAvailable models:");
    for m in &list.models {
        let marker = if *m == config.ai_engine.model { "→" } else { " " };
        println!("  {} {}", marker, m);
    }

    println!("\nConfiguration:");
    println!("  Model: {}", config.ai_engine.model);
    println!("  Mode: {}", config.transfer.mode);
    match config.classification.prompt_mode() {
        Ok(PromptMode::Level { concept, level }) => {
            println!("  Concept: {}", if concept.is_empty() { "-" } else { concept.as_str() });
            println!("  Relevance Level: {}", level);
        }
        Ok(PromptMode::Custom { template }) => println!("  Custom prompt: {}", template),
        Err(e) => println!("  Prompt: Error - {}", e),
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output, force } => {
            if output.exists() && !force {
                return Err(SiftError::Config(format!(
                    "{:?} already exists. Use --force to overwrite",
                    output
                )));
            }
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.classification.prompt_mode()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Engine: {}", config.ai_engine.url);
            println!("  Model: {}", config.ai_engine.model);
            println!("  Mode: {}", config.transfer.mode);
        }
    }

    Ok(())
}
