//! Picbot CLI - conversational image assistant
//!
//! Runs the bot on its configured channels, or locally in the terminal.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use picbot::error::{BotError, Result};
use picbot::prelude::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Picbot - search, describe and compare pictures in chat
#[derive(Parser)]
#[command(name = "picbot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "PICBOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(InitArgs),

    /// Run the bot on its configured channels
    Run(RunArgs),

    /// Talk to the bot in this terminal
    Chat(ChatArgs),

    /// Show configuration and environment status
    Status,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the run command
#[derive(Args)]
struct RunArgs {
    /// Also accept input from this terminal
    #[arg(long)]
    cli: bool,

    /// Disable the Telegram channel
    #[arg(long)]
    no_telegram: bool,
}

/// Arguments for the chat command
#[derive(Args)]
struct ChatArgs {
    /// Prompt shown before input
    #[arg(short, long, default_value = "> ")]
    prompt: String,

    /// Chat identifier; reuse it to resume a file-backed session
    #[arg(short = 'i', long, default_value = "local")]
    chat_id: String,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "picbot={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.unwrap_or_else(config_path);
    match cli.command {
        Commands::Init(args) => cmd_init(args, &config_file).await,
        Commands::Run(args) => cmd_run(args, &config_file).await,
        Commands::Chat(args) => cmd_chat(args, &config_file).await,
        Commands::Status => cmd_status(&config_file).await,
        Commands::Config(args) => cmd_config(args, &config_file).await,
    }
}

/// Load and validate; errors stop the command, warnings are logged.
async fn load_checked(config_file: &Path) -> Result<BotConfig> {
    let config = load_config_from(config_file).await?;
    for issue in config.validate() {
        match issue.level {
            IssueLevel::Error => tracing::error!("{issue}"),
            IssueLevel::Warning => tracing::warn!("{issue}"),
        }
    }
    if config.has_errors() {
        return Err(BotError::config("configuration has errors"));
    }
    Ok(config)
}

async fn cmd_init(args: InitArgs, config_file: &Path) -> Result<()> {
    if config_file.exists() && !args.force {
        println!("Configuration already exists at: {}", config_file.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    save_config(&BotConfig::default(), config_file)
        .await
        .map_err(|e| BotError::config(format!("failed to initialize config: {e}")))?;

    println!("Configuration created: {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. export TELEGRAM_BOT_TOKEN=<token> GOOGLE_API_KEY=<key> GOOGLE_CX=<cx>");
    println!("  2. set caption.endpoint and the similarity endpoints");
    println!("  3. picbot run");

    Ok(())
}

async fn cmd_run(args: RunArgs, config_file: &Path) -> Result<()> {
    let mut config = load_checked(config_file).await?;
    if args.no_telegram {
        config.telegram.enabled = false;
    }

    tracing::info!("Starting picbot...");
    let gateway = Gateway::new(GatewayConfig::new(config).enable_cli(args.cli)).await?;

    if args.cli {
        let cli = CliChannelConfig::default();
        println!("Picbot | type 'exit' to quit\n");
        tokio::select! {
            result = gateway.run() => result,
            result = picbot::channels::run_interactive(gateway.bus(), cli) => {
                result.map_err(BotError::from)
            }
        }
    } else {
        println!("Picbot running. Press Ctrl+C to stop.\n");
        gateway.run().await
    }
}

async fn cmd_chat(args: ChatArgs, config_file: &Path) -> Result<()> {
    let mut config = load_checked(config_file).await?;
    config.telegram.enabled = false;

    let cli = CliChannelConfig::new()
        .prompt(args.prompt)
        .chat_id(args.chat_id);
    let gateway = Gateway::new(
        GatewayConfig::new(config)
            .enable_cli(true)
            .cli(cli.clone()),
    )
    .await?;

    println!("Picbot chat | /photo <path>, /press <value>, 'exit' to quit\n");

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let bus = gateway.bus().clone();
    let input = async move {
        let result = picbot::channels::run_interactive(&bus, cli).await;
        let _ = done_tx.send(());
        result
    };
    let serve = gateway.run_until(async move {
        let _ = done_rx.await;
    });

    let (served, input) = tokio::join!(serve, input);
    input?;
    served
}

async fn cmd_status(config_file: &Path) -> Result<()> {
    println!("Picbot Status\n");

    println!("Configuration:");
    println!("  Path:   {}", config_file.display());
    println!(
        "  Exists: {}",
        if config_file.exists() { "yes" } else { "no" }
    );

    match load_config_from(config_file).await {
        Ok(config) => {
            let issues = config.validate();
            println!(
                "  Valid:  {}",
                if config.has_errors() { "no" } else { "yes" }
            );
            println!();
            println!("Collaborators:");
            print_configured(
                "Telegram",
                config.telegram.enabled && !config.telegram.token.is_empty(),
            );
            print_configured(
                "Search",
                !config.search.api_key.is_empty() && !config.search.cx.is_empty(),
            );
            print_configured("Translation", !config.translate.api_key.is_empty());
            print_configured("Captioning", !config.caption.endpoint.is_empty());
            print_configured(
                "Similarity",
                !config.similarity.relay_endpoint.is_empty()
                    && !config.similarity.lookup_endpoint.is_empty(),
            );
            println!();
            println!("Sessions: {:?}", config.sessions.backend);
            if !issues.is_empty() {
                println!();
                println!("Issues:");
                for issue in issues {
                    println!("  {issue}");
                }
            }
        }
        Err(e) => println!("  Valid:  no ({e})"),
    }

    println!();
    println!("Environment:");
    for name in [
        "TELEGRAM_BOT_TOKEN",
        "GOOGLE_API_KEY",
        "GOOGLE_CX",
        "YANDEX_API_KEY",
        "CAPTION_ENDPOINT",
        "PICBOT_CONFIG",
    ] {
        print_env_status(name);
    }

    Ok(())
}

async fn cmd_config(args: ConfigArgs, config_file: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            if config_file.exists() {
                let content = tokio::fs::read_to_string(config_file)
                    .await
                    .map_err(|e| BotError::config(format!("failed to read config: {e}")))?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Run 'picbot init' to create one.");
            }
        }
        ConfigCommands::Validate => match load_config_from(config_file).await {
            Ok(config) => {
                let issues = config.validate();
                if issues.is_empty() {
                    println!("Configuration is valid");
                }
                for issue in issues {
                    println!("{issue}");
                }
            }
            Err(e) => println!("error: {e}"),
        },
    }

    Ok(())
}

fn print_configured(name: &str, configured: bool) {
    let status = if configured { "configured" } else { "-" };
    println!("  {name:<12} {status}");
}

fn print_env_status(name: &str) {
    let status = if std::env::var(name).is_ok() {
        "set"
    } else {
        "-"
    };
    println!("  {name}: {status}");
}
