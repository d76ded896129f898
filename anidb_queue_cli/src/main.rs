use anidb_queue_cli::config::{AppConfig, ConfigManager};
use anidb_queue_cli::enqueue::EnqueueArgs;
use anidb_queue_cli::error::{ExitCode, format_for_user};
use anidb_queue_cli::operator::Operator;
use anidb_queue_cli::output::{self, OutputFormat};
use anidb_queue_cli::runtime;
use anidb_queue_core::QueueName;
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "anidb-queue")]
#[command(author, version, about = "Persistent, rate-limited AniDB command queues", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file to use instead of the default location
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all queues until interrupted
    Run,

    /// Queue a command
    Enqueue(EnqueueArgs),

    /// Inspect and control the queues
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Show ban state and queue counts
    Status {
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Lift an AniDB ban manually
    Unban,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Show counts and pause state of one or all queues
    Status {
        queue: Option<QueueName>,

        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Pause a queue; the flag survives restarts
    Pause { queue: QueueName },

    /// Resume a paused queue
    Resume { queue: QueueName },

    /// Drop pending and failed commands
    Clear { queue: QueueName },

    /// List failed commands
    Failed {
        queue: QueueName,

        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Make failed commands eligible again
    Retry { queue: QueueName },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Get a configuration value
    Get {
        /// Configuration key (e.g., anidb.min_send_spacing_ms)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., queues.max_attempts)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all configuration values
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug, matches!(cli.command, Commands::Run));

    let debug = cli.debug;
    if let Err(error) = execute(cli).await {
        eprintln!("{}", format_for_user(&error, debug));
        std::process::exit(ExitCode::for_error(&error).code());
    }
}

fn init_logging(debug: bool, service: bool) {
    if debug {
        env_logger::Builder::from_env(env_logger::Env::default())
            .filter_level(log::LevelFilter::Info)
            .filter_module("anidb_queue_core", log::LevelFilter::Debug)
            .filter_module("anidb_queue_cli", log::LevelFilter::Debug)
            .format_timestamp_millis()
            .init();
        eprintln!("Debug logging enabled");
    } else {
        let default_filter = if service { "info" } else { "warn" };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
            .init();
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let manager = ConfigManager::from_override(cli.config);

    match cli.command {
        Commands::Run => runtime::run(load(&manager)?).await,
        Commands::Enqueue(args) => {
            let kind = args.command.into_kind()?;
            let identity = kind.identity();
            let operator = Operator::open(&load(&manager)?.storage).await?;
            let result = operator
                .enqueue(kind, args.priority)
                .await
                .with_context(|| format!("Failed to enqueue {identity}"))?;
            operator.close().await;
            println!("{}", output::add_result(&identity, result));
            Ok(())
        }
        Commands::Queue { command } => {
            let operator = Operator::open(&load(&manager)?.storage).await?;
            let result = queue_command(&operator, command).await;
            operator.close().await;
            result
        }
        Commands::Status { format } => {
            let operator = Operator::open(&load(&manager)?.storage).await?;
            let report = operator.report().await;
            operator.close().await;
            println!("{}", output::service(&report?, format)?);
            Ok(())
        }
        Commands::Unban => {
            let operator = Operator::open(&load(&manager)?.storage).await?;
            let lifted = operator.unban().await;
            operator.close().await;
            if lifted? {
                println!("{}", "Ban lifted".green());
            } else {
                println!("No active ban");
            }
            Ok(())
        }
        Commands::Config { command } => config_command(manager, command),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

fn load(manager: &ConfigManager) -> Result<AppConfig> {
    manager.load().with_context(|| {
        format!(
            "Failed to load configuration from {}",
            manager.get_config_path().display()
        )
    })
}

async fn queue_command(operator: &Operator, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::Status { queue, format } => {
            let reports = match queue {
                Some(queue) => vec![operator.queue(queue).await?],
                None => operator.queues().await?,
            };
            println!("{}", output::queues(&reports, format)?);
        }
        QueueCommand::Pause { queue } => {
            operator.set_paused(queue, true).await?;
            println!("{} {queue}", "paused".yellow());
        }
        QueueCommand::Resume { queue } => {
            operator.set_paused(queue, false).await?;
            println!("{} {queue}", "resumed".green());
        }
        QueueCommand::Clear { queue } => {
            let removed = operator.clear(queue).await?;
            println!("Removed {removed} commands from {queue}");
        }
        QueueCommand::Failed { queue, format } => {
            let failed = operator.failed(queue).await?;
            println!("{}", output::failed(&failed, format)?);
        }
        QueueCommand::Retry { queue } => {
            let requeued = operator.retry(queue).await?;
            println!("Requeued {requeued} failed commands on {queue}");
        }
    }
    Ok(())
}

fn config_command(mut manager: ConfigManager, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { key } => {
            println!("{}", manager.get(&key)?);
        }
        ConfigCommand::Set { key, value } => {
            manager.set(&key, &value)?;
            let shown = if key == "anidb.password" { "********" } else { value.as_str() };
            eprintln!("{}", format!("Set {key} = {shown}").green());
            eprintln!(
                "Configuration saved to: {}",
                manager.get_config_path().display()
            );
        }
        ConfigCommand::List => {
            let items = manager.list()?;
            eprintln!("{}", "Configuration:".bold().blue());
            eprintln!("Config file: {}", manager.get_config_path().display());

            let mut section = "";
            for (key, value) in &items {
                let (head, rest) = key.split_once('.').unwrap_or(("general", key.as_str()));
                if head != section {
                    println!("\n[{}]", head.yellow());
                    section = head;
                }
                println!("  {} = {}", rest.cyan(), value);
            }
        }
    }
    Ok(())
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
