//! Colloquy - hands-free voice conversation client
//!
//! Listens on the microphone, cuts speech into segments by energy, sends
//! them to a speech and language backend and plays the spoken reply. The
//! microphone is never armed while the speaker is playing.

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod session;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable that overrides the config file location
const CONFIG_PATH_ENV: &str = "COLLOQUY_CONFIG";

fn init_logging() {
    use tracing_subscriber::prelude::*;

    /// Format timestamps using the system's local time via chrono
    struct LocalTimer;
    impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
        fn format_time(
            &self,
            w: &mut tracing_subscriber::fmt::format::Writer<'_>,
        ) -> std::fmt::Result {
            write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        }
    }

    let log_dir = config::config_dir().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("colloquy.log"))
        .ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path)
}

/// Load configuration and run one conversation until it ends
pub fn run() -> anyhow::Result<()> {
    init_logging();

    let path = config_path();
    let cfg = config::Config::load_from(&path)?;
    cfg.validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    tracing::info!(
        "Colloquy starting: backend {}, config {}",
        cfg.backend.base_url,
        path.display()
    );

    for device in audio::list_input_devices() {
        tracing::debug!(
            "Input device: {} (id: {}){}",
            device.name,
            device.id,
            if device.is_default { " [default]" } else { "" }
        );
    }

    // Capture polling, requests, timers and playback monitoring share one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(async move {
        let backend = Arc::new(backend::HttpBackend::new(&cfg.backend)?);
        let input = Arc::new(audio::MicrophoneInput::new(cfg.listening.device_id.clone()));
        let decoder = audio::Decoder::new(
            cfg.playback.format_priority.clone(),
            cfg.playback.manual_wav_fallback,
            audio::StagingArea::new(cfg.playback.staging_dir.clone()),
        );
        let pipeline = audio::AudioPipeline::new(decoder, Arc::new(audio::SpeakerOutput));

        let mut orchestrator = session::Orchestrator::new(cfg, backend, input, pipeline);
        let handle = orchestrator.handle();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, ending conversation");
                let _ = handle.end();
            }
        });

        orchestrator.run().await?;
        anyhow::Ok(())
    })?;

    tracing::info!("Colloquy stopped");
    Ok(())
}
