//! Pipeline runner (nar-pipeline) - Main entry point
//!
//! Assembles the pipeline against a synthetic source and a software
//! animator that consumes audio in real time. Used for soak testing and for
//! watching element behaviour (ramps, mute, timed start) in the logs.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nar_common::config::LoggingConfig;
use nar_common::timing::{is_valid_sample_rate, ms_to_jiffies};
use nar_pipeline::dsd::DSD_CHUNK_BYTES;
use nar_pipeline::msg::PipelineAnimator;
use nar_pipeline::observer::{ElementObserverThread, ObserverHook};
use nar_pipeline::{AudioTime, AudioTimeCpu, Pipeline, PipelineConfig, PipelineHooks};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod demo;

use demo::{RenderThread, SoftwareAnimator, SourceFormat, SyntheticSource};

/// Audio the software animator holds ahead of "playback"
const ANIMATOR_BUFFER_MS: u64 = 10;

/// DSD64 sample rate used by `--dsd`
const DSD64_SAMPLE_RATE: u32 = 2_822_400;

/// Command-line arguments for nar-pipeline
#[derive(Parser, Debug)]
#[command(name = "nar-pipeline")]
#[command(about = "Network audio renderer pipeline runner")]
#[command(version)]
struct Args {
    /// Configuration file (overrides NAR_CONFIG)
    #[arg(short, long, env = "NAR_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds of audio to play before stopping
    #[arg(short, long, default_value = "10")]
    duration_secs: u64,

    /// PCM sample rate of the synthetic tone
    #[arg(short, long, default_value = "44100")]
    sample_rate: u32,

    /// Mute this long after start, then unmute one second later
    #[arg(long)]
    mute_after_ms: Option<u64>,

    /// Hold the first audio until this long after start
    #[arg(long)]
    start_delay_ms: Option<u64>,

    /// Generate DSD64 instead of PCM
    #[arg(long)]
    dsd: bool,
}

/// Build info captured by build.rs
fn build_info() -> String {
    format!(
        "{} ({}, {} build, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    )
}

/// Initialize tracing: `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = logging
        .file
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!("Starting nar-pipeline {}", build_info());

    let animator = Arc::new(SoftwareAnimator::new(ms_to_jiffies(ANIMATOR_BUFFER_MS)));
    let source_format = if args.dsd {
        SourceFormat::Dsd {
            sample_rate: DSD64_SAMPLE_RATE,
            block_bytes: animator.dsd_block_size_words() as usize * DSD_CHUNK_BYTES,
        }
    } else {
        if !is_valid_sample_rate(args.sample_rate) {
            anyhow::bail!("Unsupported sample rate {}", args.sample_rate);
        }
        SourceFormat::Pcm {
            sample_rate: args.sample_rate,
        }
    };

    let observer = Arc::new(ElementObserverThread::new());
    let hooks = PipelineHooks {
        muter: Some(ObserverHook::register(
            observer.clone(),
            Box::new(|| debug!("Mute state changed")),
        )),
        starvation: Some(ObserverHook::register(
            observer.clone(),
            Box::new(|| warn!("Output resumed after starving")),
        )),
    };
    observer
        .start()
        .context("Failed to start element observer")?;

    let audio_time = Arc::new(AudioTimeCpu::new());
    let pipeline = Pipeline::new(&config, animator.clone(), audio_time.clone(), hooks)
        .context("Failed to assemble pipeline")?;
    let factory = Arc::clone(pipeline.factory());
    let (input, output, controls) = pipeline.into_parts();

    if let Some(delay_ms) = args.start_delay_ms {
        let rate = match source_format {
            SourceFormat::Pcm { sample_rate } => sample_rate,
            SourceFormat::Dsd { sample_rate, .. } => sample_rate,
        };
        let (ticks, frequency) = audio_time.tick_count(rate);
        let start = ticks + delay_ms * frequency / 1000;
        info!("Delaying start by {}ms (tick {})", delay_ms, start);
        controls.start_at(start);
    }

    let render = RenderThread::spawn(output, Arc::clone(&factory), animator.buffer_jiffies())
        .context("Failed to start animator thread")?;
    let source = SyntheticSource::spawn(input, Arc::clone(&factory), source_format)
        .context("Failed to start source thread")?;

    if let Some(mute_after_ms) = args.mute_after_ms {
        let controls = controls.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(mute_after_ms)).await;
            let mute = controls.clone();
            if tokio::task::spawn_blocking(move || mute.mute()).await.is_ok() {
                info!("Output muted");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            controls.unmute();
            info!("Output unmuted");
        });
    }

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            info!("Played for {}s", args.duration_secs);
        }
    }

    source.stop();
    let (audio_msgs, stats) = tokio::task::spawn_blocking(move || {
        let audio_msgs = source.join();
        (audio_msgs, render.join())
    })
    .await
    .context("Shutdown task failed")?;
    observer.stop();

    info!(
        "Pushed {} audio messages, rendered {} bytes ({} silent) in {} messages, {} halts",
        audio_msgs, stats.bytes, stats.silent_bytes, stats.playable_msgs, stats.halts
    );
    info!(
        "Starvation gaps: {}, reservoir at exit: {} msgs, messages still allocated: {}",
        controls.starvation().gaps(),
        controls.reservoir().msgs(),
        factory.in_use()
    );
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
