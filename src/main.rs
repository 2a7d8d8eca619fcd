use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webcam_server::config::Config;
use webcam_server::gate::SensorGate;
use webcam_server::periodic::{OwnerSlot, PeriodicCapture};
use webcam_server::sensor::pattern::PatternSensor;
use webcam_server::sensor::{CameraModel, FrameSize, ImageSensor};
use webcam_server::settings::TomlSettingsStore;
use webcam_server::snapshot::Exporter;
use webcam_server::storage::disk::DirMedium;
use webcam_server::storage::{MediumKind, MountManager, StorageMedium};
use webcam_server::web::{run_server, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Shared-camera HTTP server", long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &args.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config from {}", path))?
        }
        None => Config::default(),
    };

    let model = CameraModel::parse(&config.camera.model)?;
    let frame_size = FrameSize::parse(&config.camera.frame_size)?;
    let sensor: Arc<dyn ImageSensor> = Arc::new(PatternSensor::init(model, frame_size)?);
    info!(model = %config.camera.model, frame_size = %config.camera.frame_size, "sensor initialized");

    let sd: Arc<dyn StorageMedium> = Arc::new(DirMedium::new(
        MediumKind::Sd,
        config.storage.sd_root.as_str(),
    ));
    let mmc: Arc<dyn StorageMedium> = Arc::new(DirMedium::new(
        MediumKind::Mmc,
        config.storage.mmc_root.as_str(),
    ));
    let settings = Arc::new(TomlSettingsStore::new(config.export.settings_path.as_str()));

    let gate = Arc::new(SensorGate::new());
    let exporter = Arc::new(Exporter::new(
        Arc::clone(&sensor),
        Arc::clone(&gate),
        Arc::new(MountManager::new()),
        config.export.prefix.clone(),
    ));
    let periodic = Arc::new(PeriodicCapture::new(
        Arc::clone(&exporter),
        Arc::clone(&gate),
        OwnerSlot::new(),
    ));

    let state = Arc::new(AppState {
        sensor,
        gate,
        exporter,
        periodic,
        sd,
        mmc,
        settings,
        config: Arc::new(config),
    });

    run_server(state).await
}
