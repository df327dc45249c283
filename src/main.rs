use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use vigil::config::Config;
use vigil::logging::init_logging;
use vigil::orchestrator::Orchestrator;
use vigil::ExitOutcome;

/// Always-on vehicle telemetry daemon: OBD-II acquisition, drive detection,
/// alerting and backup.
#[derive(Parser, Debug)]
#[command(name = "vigil", version = env!("APP_VERSION"), about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults to `vigil_config.yaml`
    /// next to the running binary, regardless of the working directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load additional environment variables from this file before resolving
    /// ${VAR} placeholders in the config. Defaults to `.env` next to the
    /// running binary, if present.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Force the simulated OBD link and hardware stand-ins regardless of
    /// config, for demoing or testing without a vehicle attached
    #[arg(long)]
    simulate: bool,

    /// Load and validate configuration, then exit without starting the
    /// orchestrator
    #[arg(long)]
    dry_run: bool,

    /// Raise the console log level to debug
    #[arg(short, long)]
    verbose: bool,
}

/// Directory containing the running binary, used to resolve the default
/// config and env-file paths regardless of the daemon's working directory.
fn binary_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let dir = binary_dir();

    let env_file = cli
        .env_file
        .or_else(|| dir.as_ref().map(|d| d.join(".env")));
    if let Some(path) = &env_file {
        if path.exists() {
            if let Err(e) = dotenvy::from_path(path) {
                eprintln!("failed to load env file {}: {}", path.display(), e);
                return ExitCode::from(ExitOutcome::ConfigError.code());
            }
        }
    }

    let config_path = cli
        .config
        .or_else(|| dir.as_ref().map(|d| d.join("vigil_config.yaml")))
        .unwrap_or_else(|| PathBuf::from("vigil_config.yaml"));
    let mut config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config {}: {}", config_path.display(), e);
            return ExitCode::from(ExitOutcome::ConfigError.code());
        }
    };

    if cli.verbose {
        config.logging.console_level = Some("debug".to_string());
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::from(ExitOutcome::ConfigError.code());
    }

    if let Err(e) = config.validate(cli.simulate) {
        tracing::error!("configuration invalid: {}", e);
        return ExitCode::from(ExitOutcome::ConfigError.code());
    }

    if cli.dry_run {
        tracing::info!("configuration valid, exiting (--dry-run)");
        return ExitCode::from(ExitOutcome::Success.code());
    }

    tracing::info!("vigil starting up");

    let (orchestrator, handles, poller_rx, hardware_rx, shutdown_tx) =
        match Orchestrator::new(config, cli.simulate).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("startup failed: {}", e);
                return ExitCode::from(ExitOutcome::SystemError.code());
            }
        };

    let outcome = orchestrator
        .run(handles, poller_rx, hardware_rx, shutdown_tx)
        .await;

    tracing::info!("vigil exiting with outcome {:?}", outcome);
    ExitCode::from(outcome.code())
}
