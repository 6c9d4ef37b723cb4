use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use desk_controller::config::{self, Config};
use desk_controller::{
    discovery, DeskController, DeskError, MoveOutcome, StrategyKind, TelemetryObserver,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "desk")]
#[command(about = "Standing desk control over Bluetooth LE", long_about = None)]
#[command(version)]
struct Cli {
    /// Bluetooth address of the desk (defaults to the one in the config file)
    #[arg(long, global = true)]
    mac_address: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// How move commands are driven: reference-input or polling-jog
    #[arg(long, global = true, default_value_t = StrategyKind::ReferenceInput)]
    strategy: StrategyKind,

    /// Configuration file (defaults to <config dir>/idasen/idasen.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Overwrite any existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Pair with the desk
    Pair,

    /// Print the desk height
    Height,

    /// Print the desk speed
    Speed,

    /// Print height changes until interrupted
    Monitor {
        /// Also print the speed
        #[arg(long)]
        speed: bool,
    },

    /// Save the current height as a named position
    Save { name: String },

    /// Delete a named position
    Delete { name: String },

    /// Stop the desk
    Stop,

    /// Move to a named position from the config file
    #[command(external_subcommand)]
    Position(Vec<String>),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("btleplug=error,desk_controller={level},desk={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn init(path: &Path, force: bool) -> Result<ExitCode> {
    if !force && path.exists() {
        eprintln!("Configuration file already exists.");
        eprintln!("Use --force to overwrite existing configuration.");
        return Ok(ExitCode::FAILURE);
    }

    let mut config = Config::default();
    match discovery::discover().await {
        Some(address) => {
            eprintln!("Discovered desk's MAC address: {}", address);
            config.mac_address = Some(address);
        }
        None => eprintln!("Failed to discover desk's MAC address"),
    }
    config.save(path)?;
    eprintln!("Created new configuration file at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn move_to(desk: &DeskController, name: &str, target: f64) -> Result<()> {
    let outcome = tokio::select! {
        outcome = desk.move_to_target(target) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            desk.stop().await?;
            MoveOutcome::Cancelled
        }
    };

    match outcome {
        MoveOutcome::Reached | MoveOutcome::AlreadyAtTarget => {
            let height = desk.get_height().await?;
            println!("Moved to {} ({:.3} meters)", name, height);
            Ok(())
        }
        MoveOutcome::SafetyAbort { height } => {
            Err(anyhow!("Desk stopped at {:.3} meters before reaching {}", height, name))
        }
        MoveOutcome::Cancelled => Err(anyhow!("Move to {} interrupted", name)),
        MoveOutcome::AlreadyMoving => Err(anyhow!("Desk is already moving")),
    }
}

async fn with_desk(
    desk: &DeskController,
    command: Commands,
    config: &mut Config,
    path: &Path,
) -> Result<()> {
    match command {
        Commands::Pair => desk.pair().await.context("Pairing failed")?,
        Commands::Height => println!("{:.3} meters", desk.get_height().await?),
        Commands::Speed => println!("{:.3} meters/second", desk.get_speed().await?),
        Commands::Monitor { speed: with_speed } => {
            let observer = if with_speed {
                TelemetryObserver::height_and_speed(|height, speed| {
                    println!("{:.3} meters {:.3} meters/second", height, speed);
                    let _ = std::io::stdout().flush();
                })
            } else {
                TelemetryObserver::height(|height| {
                    println!("{:.3} meters", height);
                    let _ = std::io::stdout().flush();
                })
            };
            desk.monitor(observer).await?;
            tokio::signal::ctrl_c().await?;
        }
        Commands::Save { name } => {
            let height = desk.get_height().await?;
            config.set_position(&name, height)?;
            config.save(path)?;
            println!("Saved position {} ({:.3} meters)", name, height);
        }
        Commands::Stop => desk.stop().await?,
        Commands::Position(args) => {
            let name = args.first().ok_or_else(|| anyhow!("Missing position name"))?;
            let target = config.position(name).ok_or_else(|| {
                anyhow!("Unknown position {:?}, use `desk save {}` first", name, name)
            })?;
            move_to(desk, name, target).await?;
        }
        // handled before connecting
        Commands::Init { .. } | Commands::Delete { .. } => {}
    }
    Ok(())
}

/// A failed disconnect is only logged so it never hides the command's own error.
fn settle(result: Result<()>, disconnected: Result<(), DeskError>) -> Result<()> {
    if let Err(e) = disconnected {
        warn!(error = %e, "Failed to disconnect");
    }
    result
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };

    let mut config = match cli.command {
        Commands::Init { force } => return init(&path, force).await,
        _ => Config::load(&path)?,
    };

    if let Commands::Delete { name } = &cli.command {
        let height = config.remove_position(name)?;
        config.save(&path)?;
        println!("Deleted position {} ({:.3} meters)", name, height);
        return Ok(ExitCode::SUCCESS);
    }

    let address = cli
        .mac_address
        .or_else(|| config.mac_address.clone())
        .filter(|address| !address.trim().is_empty())
        .ok_or_else(|| anyhow!("mac_address must be provided via the CLI or the config file"))?;

    let desk = DeskController::ble(address)
        .with_strategy(cli.strategy)
        .exit_on_fail(true);
    desk.connect().await?;

    let result = with_desk(&desk, cli.command, &mut config, &path).await;
    settle(result, desk.disconnect().await).map(|_| ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use desk_controller::TransportError;

    #[test]
    fn disconnect_failure_keeps_command_error() {
        let err = settle(
            Err(anyhow!("Move to stand interrupted")),
            Err(TransportError::NotConnected.into()),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Move to stand interrupted");
    }

    #[test]
    fn disconnect_failure_alone_is_not_fatal() {
        assert!(settle(Ok(()), Err(TransportError::NotConnected.into())).is_ok());
    }

    #[test]
    fn named_positions_parse_as_external_subcommand() {
        let cli = Cli::try_parse_from(["desk", "stand"]).unwrap();
        assert!(matches!(cli.command, Commands::Position(args) if args == ["stand"]));
    }
}
