//! Irrigation controller daemon (irrigd)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use irrigd::config::DEFAULT_CONFIG_PATH;
use irrigd::{AppConfig, Command, Controller, Hardware, MonotonicClock};

/// Command-line arguments for irrigd
#[derive(Parser, Debug)]
#[command(
    name = "irrigd",
    version = env!("CARGO_PKG_VERSION"),
    about = "Autonomous irrigation controller",
    long_about = None
)]
struct Args {
    /// Configuration file (defaults to config/irrigd.yaml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Validation mode - only validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Use in-memory GPIO and a simulated soil sensor
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Mode {
    /// Start the controller (default)
    Run,
    /// Read both sensors once and print the snapshot as JSON
    Probe,
    /// Write one holding register of the soil sensor
    WriteRegister {
        #[arg(long)]
        register: u16,
        #[arg(long)]
        value: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).with_context(|| {
        format!(
            "loading {}",
            args.config
                .as_deref()
                .map_or_else(|| DEFAULT_CONFIG_PATH.into(), |p| p.display().to_string())
        )
    })?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    if args.validate {
        println!("Configuration is valid");
        return Ok(());
    }

    let _log_guard = common::init_logging("irrigd", &config.logging)
        .map_err(|e| anyhow::anyhow!("logging setup failed: {}", e))?;
    info!(version = env!("CARGO_PKG_VERSION"), simulate = args.simulate, "irrigd starting");

    let hardware = if args.simulate {
        Hardware::simulated(&config)
    } else {
        Hardware::open(&config)?
    };
    let mut controller = Controller::build(&config, hardware, Arc::new(MonotonicClock::new()))?;

    match args.command.unwrap_or(Mode::Run) {
        Mode::Run => {
            let token = CancellationToken::new();
            tokio::spawn(common::shutdown_on_signal(token.clone()));
            controller.run(token).await?;
        },
        Mode::Probe => {
            let snapshot = controller.probe().await;
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        },
        Mode::WriteRegister { register, value } => {
            controller
                .service()
                .execute(Command::WriteRegister { register, value })
                .await?;
            println!("Register {} set to {}", register, value);
        },
    }

    Ok(())
}
