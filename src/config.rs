//! Broadcaster configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::playlist::{CursorMode, VisualMode};

/// RTMP(S) endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Base ingest link, e.g. `rtmps://dc4-1.rtmp.example.org/s/`
    pub base_link: String,

    /// Stream key appended to the base link
    pub stream_key: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_link: String::new(),
            stream_key: String::new(),
        }
    }
}

/// Output video configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Output frame width in pixels
    pub width: u32,

    /// Output frame height in pixels
    pub height: u32,

    /// Use low-latency x264 settings (ultrafast/zerolatency/baseline)
    pub low_latency: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1360,
            height: 752,
            low_latency: true,
        }
    }
}

/// On-disk asset locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Root directory for static assets
    pub assets_dir: PathBuf,

    /// Still image shown while nothing is playing; the broadcaster refuses
    /// to start without it
    pub placeholder_image: PathBuf,

    /// Directory holding pre-downloaded track files
    pub media_dir: PathBuf,

    /// Directory holding per-track preview images (paired by file stem)
    pub thumbnails_dir: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            placeholder_image: PathBuf::from("assets/standby.jpg"),
            media_dir: PathBuf::from("assets/multimedia"),
            thumbnails_dir: PathBuf::from("assets/thumbnails"),
        }
    }
}

/// Initial playback behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Initial visual mode (content, thumbnail, placeholder)
    pub visual_mode: VisualMode,

    /// Initial cursor mode (delete, stop, loop)
    pub cursor_mode: CursorMode,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            visual_mode: VisualMode::Content,
            cursor_mode: CursorMode::PlayAndDelete,
        }
    }
}

/// Top-level broadcaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// RTMP endpoint
    pub stream: StreamConfig,

    /// Output video parameters
    pub video: VideoConfig,

    /// Asset locations
    pub assets: AssetConfig,

    /// Initial playback modes
    pub playback: PlaybackConfig,

    /// Log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            video: VideoConfig::default(),
            assets: AssetConfig::default(),
            playback: PlaybackConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl BroadcastConfig {
    /// The full publishing URL: base link and stream key joined with a
    /// single `/` (a trailing slash on the base link is trimmed first).
    pub fn rtmp_url(&self) -> String {
        let base = self.stream.base_link.trim_end_matches('/');
        format!("{}/{}", base, self.stream.stream_key)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: BroadcastConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BroadcastConfig::default();
        assert_eq!(config.video.width, 1360);
        assert_eq!(config.video.height, 752);
        assert!(config.video.low_latency);
        assert_eq!(config.assets.assets_dir, PathBuf::from("assets"));
    }

    #[test]
    fn test_rtmp_url_trims_trailing_slash() {
        let config = BroadcastConfig {
            stream: StreamConfig {
                base_link: "rtmps://dc4-1.rtmp.example.org/s/".to_string(),
                stream_key: "1234:abcd".to_string(),
            },
            ..Default::default()
        };
        assert_eq!(config.rtmp_url(), "rtmps://dc4-1.rtmp.example.org/s/1234:abcd");
    }

    #[test]
    fn test_rtmp_url_without_trailing_slash() {
        let config = BroadcastConfig {
            stream: StreamConfig {
                base_link: "rtmp://ingest.example.org/live".to_string(),
                stream_key: "key".to_string(),
            },
            ..Default::default()
        };
        assert_eq!(config.rtmp_url(), "rtmp://ingest.example.org/live/key");
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let mut config = BroadcastConfig::default();
        config.stream.stream_key = "secret".to_string();
        config.video.width = 1280;
        config.to_file(path).unwrap();

        let loaded = BroadcastConfig::from_file(path).unwrap();
        assert_eq!(loaded.stream.stream_key, "secret");
        assert_eq!(loaded.video.width, 1280);
        assert_eq!(loaded.video.height, 752);
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[video]\nwidth = 1920\nheight = 1080\n").unwrap();

        let loaded = BroadcastConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.video.width, 1920);
        assert_eq!(loaded.video.height, 1080);
        assert!(loaded.stream.base_link.is_empty());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        assert!(BroadcastConfig::from_file("/nonexistent/config.toml").is_err());
    }
}
