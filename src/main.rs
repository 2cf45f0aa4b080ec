//! Continuous RTMP broadcaster
//!
//! Publishes a single, never-ending H.264/AAC FLV stream to an RTMP(S)
//! endpoint by stitching together a dynamically mutating playlist of media
//! files with a silent placeholder segment as filler. The streaming engine
//! runs on a dedicated OS thread; tokio only hosts signal handling.

#![allow(dead_code)]

mod broadcaster;
mod config;
mod encode;
mod error;
mod ffmpeg;
mod placeholder;
mod playlist;
mod producer;
mod shutdown;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::broadcaster::Broadcaster;
use crate::config::BroadcastConfig;
use crate::error::Result;
use crate::playlist::Player;
use crate::shutdown::ShutdownLatch;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "rtmp-broadcaster";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first: its log_level seeds the default filter
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        match BroadcastConfig::from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config file {}: {}. Using defaults.", config_path, e);
                BroadcastConfig::default()
            }
        }
    } else {
        BroadcastConfig::default()
    };

    init_logging(&config.log_level);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    ffmpeg::init()?;

    let player = Arc::new(Player::new(
        config.playback.visual_mode,
        config.playback.cursor_mode,
    ));
    for asset in playlist::scan_media_library(&config.assets.media_dir, &config.assets.thumbnails_dir)
    {
        player.append(asset);
    }
    tracing::info!(tracks = player.len(), "playlist seeded from media directory");

    let shutdown = ShutdownLatch::new();
    let broadcaster = Arc::new(Broadcaster::new(config, player, shutdown));

    let mut runner = {
        let broadcaster = broadcaster.clone();
        tokio::task::spawn_blocking(move || broadcaster.run())
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            broadcaster.stop();
            match (&mut runner).await {
                Ok(result) => result?,
                Err(e) => tracing::error!(error = %e, "broadcaster thread panicked"),
            }
        }
        joined = &mut runner => {
            match joined {
                Ok(result) => result?,
                Err(e) => tracing::error!(error = %e, "broadcaster thread panicked"),
            }
        }
    }

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(default_level: &str) {
    let default_filter = format!("rtmp_broadcaster={}", default_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
