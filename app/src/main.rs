//! Demo host for the livemix pipeline.
//!
//! Builds a mixer over the mock capture backend, attaches a synthetic
//! camera and microphone, feeds them for a few seconds and prints the
//! mixer statistics as JSON.
//!
//! Usage: `livemix-demo [config.json] [seconds]`

mod demo;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livemix_types::MixerConfig;

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "livemix_demo=debug,livemix_engine=debug,livemix_capture=debug,livemix_audio=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&str>) -> Result<MixerConfig> {
    let Some(path) = path else {
        return Ok(MixerConfig::default());
    };

    let text = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("Failed to read config {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path))
}

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config(args.first().map(String::as_str))?;
    let seconds: u64 = match args.get(1) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid duration {}", value))?,
        None => 3,
    };

    info!(frame_rate = config.frame_rate, seconds, "livemix demo starting");
    let report = demo::run(config, Duration::from_secs(seconds))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
