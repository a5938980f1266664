use anyhow::{anyhow, Context, Result};
use clap::Parser;
use common::config::EmulatorConfig;
use dialoguer::Input;
use onvif_emulator::bootstrap::{self, CameraAddress, OnvifMediaClient};
use onvif_emulator::{Orchestrator, OrchestratorOptions};
use std::path::PathBuf;
use telemetry::LogConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "onvif-emulator")]
#[command(about = "Virtual ONVIF cameras relaying to real backends", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(env = "ONVIF_CONFIG", required_unless_present = "create_config")]
    config: Option<PathBuf>,

    /// Query a real camera and print a configuration for it
    #[arg(short = 'c', long)]
    create_config: bool,

    /// Camera address as host[:port] (create-config only)
    #[arg(long, requires = "create_config")]
    host: Option<String>,

    /// Camera username (create-config only)
    #[arg(long, requires = "create_config")]
    username: Option<String>,

    /// Camera password (create-config only)
    #[arg(long, env = "ONVIF_PASSWORD", hide_env_values = true, requires = "create_config")]
    password: Option<String>,

    /// Image served at /snapshot.png
    #[arg(
        long,
        env = "ONVIF_SNAPSHOT_IMAGE",
        default_value = "./resources/snapshot.png"
    )]
    snapshot_image: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("onvif-emulator").with_default_level(level),
    );

    if cli.create_config {
        return create_config(&cli).await;
    }

    let config_path = cli
        .config
        .clone()
        .ok_or_else(|| anyhow!("configuration file required"))?;
    let config = EmulatorConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    info!(
        config = %config_path.display(),
        devices = config.onvif.len(),
        "configuration loaded"
    );

    let options = OrchestratorOptions {
        snapshot_image: cli.snapshot_image.clone(),
        ..Default::default()
    };
    let mut emulator = Orchestrator::start(&config, options).await;

    if emulator.running_units() == 0 {
        return Err(anyhow!("no emulator unit could be started"));
    }

    tokio::select! {
        _ = emulator.wait() => {
            info!("all emulator units stopped");
        }
        _ = shutdown_signal() => {}
    }

    emulator.shutdown().await;
    Ok(())
}

async fn create_config(cli: &Cli) -> Result<()> {
    let host = match &cli.host {
        Some(host) => host.clone(),
        None => Input::<String>::new()
            .with_prompt("ONVIF camera (host[:port])")
            .interact_text()
            .context("failed to read camera address")?,
    };
    let camera = CameraAddress::parse(&host)?;

    let username = match &cli.username {
        Some(username) => username.clone(),
        None => Input::<String>::new()
            .with_prompt("Username")
            .allow_empty(true)
            .interact_text()
            .context("failed to read username")?,
    };

    let password = match &cli.password {
        Some(password) => password.clone(),
        None => rpassword::prompt_password("Password: ").context("failed to read password")?,
    };

    let (username, password) = if username.is_empty() {
        (None, None)
    } else {
        (Some(username), Some(password))
    };

    info!(camera = %format!("{}:{}", camera.host, camera.port), "querying camera profiles");

    let client = OnvifMediaClient::new(camera.media_service_url(), username, password)?;
    let config = bootstrap::create_config(&client, &camera)
        .await
        .context("failed to build configuration from camera")?;
    let yaml = config.to_yaml()?;

    println!("# ==================== CONFIG START ====================");
    print!("{yaml}");
    println!("# ===================== CONFIG END =====================");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
