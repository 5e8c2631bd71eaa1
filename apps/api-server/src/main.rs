use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use wirekit::Container;
use wirekit_bootstrap::{logging, signals, Settings};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const START_DEADLINE: Duration = Duration::from_secs(30);
const STOP_DEADLINE: Duration = Duration::from_secs(30);

/// wirekit API server
#[derive(Parser)]
#[command(name = "api-server")]
#[command(about = "Modular REST API server")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for the HTTP server (wins over config and env)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

fn register_modules(settings: &Settings, container: &mut Container) -> Result<()> {
    container.supply(settings.clone())?;
    http_gateway::register(container)?;
    session_guard::register(container)?;

    if settings.get_str("database.type").is_some() || settings.get_str("database.file").is_some() {
        wirekit_db::register(container)?;
        users::register(container)?;
    } else {
        tracing::warn!("no database section configured, user routes disabled");
    }
    Ok(())
}

async fn run_server(settings: Settings) -> Result<()> {
    let mut container = Container::new();
    register_modules(&settings, &mut container)?;

    container.build()?;
    container.start(START_DEADLINE).await?;
    tracing::info!(app = %settings.config().app.name, "startup complete");

    let token = container.shutdown_token();
    tokio::select! {
        _ = token.cancelled() => {
            tracing::info!("shutdown token cancelled");
        }
        result = signals::wait_for_shutdown() => {
            result?;
        }
    }

    container.stop(STOP_DEADLINE).await?;
    tracing::info!("shutdown complete");
    Ok(())
}

fn check_config(settings: &Settings) -> Result<()> {
    if settings.get_str("database.type").is_some() || settings.get_str("database.file").is_some() {
        let db: wirekit_db::DbConnConfig = settings.section("database")?;
        db.defaulted().validate()?;
    }
    println!("configuration OK");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.override_server_port(port);
    }
    match cli.verbose {
        0 => {}
        1 => settings.override_log_level("debug"),
        _ => settings.override_log_level("trace"),
    }

    logging::init(&settings.config().logging);

    if cli.print_config {
        println!("{}", settings.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(settings).await,
        Commands::Check => check_config(&settings),
    }
}
