use anyhow::{Context, Result};
use clap::Parser;
use lib_relay::SourceKind;
use lib_relay::core::DetectorKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[command(about = "Tails a sensor file and streams appended records as Server-Sent Events", version)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[arg(long, env = "PORT", help = "Port to listen on for stream clients.")]
    pub port: Option<u16>,

    #[arg(long, env = "HARDWARE_PATH", help = "Sensor file to tail.")]
    pub hardware_path: Option<PathBuf>,

    #[arg(long, env = "RELAY_DETECTOR", help = "Change detection strategy (poll or watch).")]
    pub detector: Option<String>,

    #[arg(long, env = "RELAY_POLL_INTERVAL_MS", help = "Polling period in milliseconds (also the watch fallback).")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, env = "RELAY_HEARTBEAT_INTERVAL_MS", help = "Milliseconds between heartbeat frames.")]
    pub heartbeat_interval_ms: Option<u64>,

    #[arg(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,
}

/// Fully resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub source: SourceKind,
    pub port: u16,
    pub hardware_path: PathBuf,
    pub detector: DetectorKind,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl RelayConfig {
    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: RelayConfig) -> RelayConfig {
        RelayConfig {
            port: other.port.or(self.port),
            hardware_path: other.hardware_path.or(self.hardware_path),
            detector: other.detector.or(self.detector),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            heartbeat_interval_ms: other.heartbeat_interval_ms.or(self.heartbeat_interval_ms),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            config_path: other.config_path.or(self.config_path),
        }
    }

    fn defaults(source: SourceKind) -> RelayConfig {
        // Radar is appended in bursts by a process that may not trigger
        // notifications reliably; the telescope writer does.
        let detector = match source {
            SourceKind::Radar => "poll",
            SourceKind::Rt => "watch",
        };
        RelayConfig {
            port: Some(8000),
            detector: Some(detector.to_string()),
            poll_interval_ms: Some(100),
            heartbeat_interval_ms: Some(1000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    fn resolve(self, source: SourceKind) -> Result<RelaySettings> {
        let hardware_path = self
            .hardware_path
            .context("HARDWARE_PATH is not set; the relay needs a sensor file to tail")?;
        let detector = self
            .detector
            .unwrap_or_else(|| "poll".to_string())
            .parse::<DetectorKind>()
            .map_err(anyhow::Error::msg)?;

        Ok(RelaySettings {
            source,
            port: self.port.unwrap_or(8000),
            hardware_path,
            detector,
            poll_interval: Duration::from_millis(self.poll_interval_ms.unwrap_or(100)),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.unwrap_or(1000)),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[command(about = "Merges the radar and radio-telescope streams into holoscreen snapshots", version)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    #[arg(long, env = "DISPLAY_RADAR_URL", help = "Event stream URL of the radar relay.")]
    pub radar_url: Option<String>,

    #[arg(long, env = "DISPLAY_RT_URL", help = "Event stream URL of the radio-telescope relay.")]
    pub rt_url: Option<String>,

    #[arg(long, env = "DISPLAY_OUTPUT_PATH", help = "File the snapshots are written to.")]
    pub output_path: Option<PathBuf>,

    #[arg(long, env = "DISPLAY_SNAPSHOT_PERIOD_MS", help = "Milliseconds between snapshot writes.")]
    pub snapshot_period_ms: Option<u64>,

    #[arg(long, env = "DISPLAY_RECONNECT_DELAY_MS", help = "Delay in milliseconds before reconnecting to a relay.")]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long, env = "DISPLAY_SILENCE_TIMEOUT_MS", help = "Milliseconds without any frame, heartbeats included, before a relay connection is dropped.")]
    pub silence_timeout_ms: Option<u64>,

    #[arg(long, env = "DISPLAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "DISPLAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "DISPLAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,
}

/// Fully resolved display configuration.
#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub radar_url: String,
    pub rt_url: String,
    pub output_path: PathBuf,
    pub snapshot_period: Duration,
    pub reconnect_delay: Duration,
    pub silence_timeout: Duration,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl DisplayConfig {
    fn merge(self, other: DisplayConfig) -> DisplayConfig {
        DisplayConfig {
            radar_url: other.radar_url.or(self.radar_url),
            rt_url: other.rt_url.or(self.rt_url),
            output_path: other.output_path.or(self.output_path),
            snapshot_period_ms: other.snapshot_period_ms.or(self.snapshot_period_ms),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            silence_timeout_ms: other.silence_timeout_ms.or(self.silence_timeout_ms),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            config_path: other.config_path.or(self.config_path),
        }
    }

    fn defaults() -> DisplayConfig {
        DisplayConfig {
            radar_url: Some("http://radar:8000/events".to_string()),
            rt_url: Some("http://rt:8000/events".to_string()),
            output_path: Some(PathBuf::from("/hw/holoscreen")),
            snapshot_period_ms: Some(500),
            reconnect_delay_ms: Some(1000),
            silence_timeout_ms: Some(5000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    fn resolve(self) -> DisplaySettings {
        DisplaySettings {
            radar_url: self.radar_url.unwrap_or_else(|| "http://radar:8000/events".to_string()),
            rt_url: self.rt_url.unwrap_or_else(|| "http://rt:8000/events".to_string()),
            output_path: self.output_path.unwrap_or_else(|| PathBuf::from("/hw/holoscreen")),
            snapshot_period: Duration::from_millis(self.snapshot_period_ms.unwrap_or(500)),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms.unwrap_or(1000)),
            silence_timeout: Duration::from_millis(self.silence_timeout_ms.unwrap_or(5000)),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
        }
    }
}

/// Reads a JSON config file. A missing or broken file is logged and skipped.
fn read_config_file<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let Ok(config_str) = fs::read_to_string(path) else {
        log::warn!("Failed to read config file: {}. Falling back to other sources.", path.display());
        return None;
    };
    match serde_json::from_str::<T>(&config_str) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Failed to parse config file: {} ({}). Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Defaults, then the config file, then environment variables and CLI
/// arguments (already folded together in `cli`).
pub fn resolve_relay_config(source: SourceKind, cli: RelayConfig) -> Result<RelaySettings> {
    let path = cli.config_path.clone().unwrap_or_else(|| PathBuf::from("server_relay.conf"));
    let mut current = RelayConfig::defaults(source);
    if let Some(file_config) = read_config_file::<RelayConfig>(&path) {
        current = current.merge(file_config);
    }
    current.merge(cli).resolve(source)
}

pub fn load_relay_config(source: SourceKind) -> Result<RelaySettings> {
    resolve_relay_config(source, RelayConfig::parse())
}

pub fn resolve_display_config(cli: DisplayConfig) -> DisplaySettings {
    let path = cli.config_path.clone().unwrap_or_else(|| PathBuf::from("server_display.conf"));
    let mut current = DisplayConfig::defaults();
    if let Some(file_config) = read_config_file::<DisplayConfig>(&path) {
        current = current.merge(file_config);
    }
    current.merge(cli).resolve()
}

pub fn load_display_config() -> DisplaySettings {
    resolve_display_config(DisplayConfig::parse())
}
