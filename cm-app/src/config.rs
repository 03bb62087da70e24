//! Clipmark configuration loader.

use cm_core::SchedulerConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClipmarkConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Delay between successful poll cycles.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Flat delay after a transient failure.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// Extended delay after the upstream rate-limits us.
    #[serde(default = "default_rate_limit_delay_seconds")]
    pub rate_limit_delay_seconds: u64,
    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    /// Consecutive transient failures before a session pauses itself.
    #[serde(default = "default_error_cap")]
    pub error_cap: u32,
    /// Seconds subtracted from a command's event time to find the clip
    /// target; channels may override.
    #[serde(default = "default_lookback_seconds")]
    pub lookback_seconds: u64,
    /// Dedup ledger capacity per session (hard bound is twice this).
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
}

fn default_poll_interval_seconds() -> u64 {
    30
}

fn default_retry_delay_seconds() -> u64 {
    30
}

fn default_rate_limit_delay_seconds() -> u64 {
    120
}

fn default_fetch_timeout_seconds() -> u64 {
    10
}

fn default_error_cap() -> u32 {
    5
}

fn default_lookback_seconds() -> u64 {
    30
}

fn default_ledger_capacity() -> usize {
    500
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            retry_delay_seconds: default_retry_delay_seconds(),
            rate_limit_delay_seconds: default_rate_limit_delay_seconds(),
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            error_cap: default_error_cap(),
            lookback_seconds: default_lookback_seconds(),
            ledger_capacity: default_ledger_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub youtube_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Path to the clips database. Default: `<data dir>/clips.sqlite`.
    #[serde(default)]
    pub clips_db: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    /// HTTP endpoint receiving one appended row per dispatched clip. Absent
    /// means storage-only dispatch.
    #[serde(default)]
    pub append_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub default: ChannelRouteConfig,
    /// Keyed by upstream channel id.
    #[serde(default)]
    pub routes: HashMap<String, ChannelRouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRouteConfig {
    #[serde(default = "default_channel_name")]
    pub name: String,
    #[serde(default = "default_channel_short_name")]
    pub short_name: String,
    #[serde(default)]
    pub sheet_id: Option<String>,
    #[serde(default)]
    pub lookback_seconds: Option<u64>,
    #[serde(default = "default_auto_clip")]
    pub auto_clip: bool,
}

fn default_channel_name() -> String {
    "Default Channel".to_string()
}

fn default_channel_short_name() -> String {
    "DEF".to_string()
}

fn default_auto_clip() -> bool {
    true
}

impl Default for ChannelRouteConfig {
    fn default() -> Self {
        Self {
            name: default_channel_name(),
            short_name: default_channel_short_name(),
            sheet_id: None,
            lookback_seconds: None,
            auto_clip: default_auto_clip(),
        }
    }
}

impl ClipmarkConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: ClipmarkConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("YT_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.youtube_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CLIPMARK_REPORT_URL") {
            if !v.trim().is_empty() {
                self.report.append_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CLIPMARK_DB") {
            if !v.trim().is_empty() {
                self.storage.clips_db = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CLIPMARK_PORT") {
            if let Ok(port) = v.trim().parse::<u16>() {
                self.server.port = port;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.keys.youtube_api_key.as_deref().is_none_or(str::is_empty) {
            return Err(anyhow::anyhow!(
                "keys.youtube_api_key is required (or set YT_API_KEY)"
            ));
        }
        if self.general.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("general.poll_interval_seconds must be > 0"));
        }
        if self.general.fetch_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("general.fetch_timeout_seconds must be > 0"));
        }
        if self.general.error_cap == 0 {
            return Err(anyhow::anyhow!("general.error_cap must be > 0"));
        }
        if self.general.ledger_capacity == 0 {
            return Err(anyhow::anyhow!("general.ledger_capacity must be > 0"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        Ok(())
    }

    pub fn api_key(&self) -> &str {
        self.keys.youtube_api_key.as_deref().unwrap_or_default()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.general.poll_interval_seconds),
            retry_delay: Duration::from_secs(self.general.retry_delay_seconds),
            rate_limit_delay: Duration::from_secs(self.general.rate_limit_delay_seconds),
            fetch_timeout: Duration::from_secs(self.general.fetch_timeout_seconds),
            error_cap: self.general.error_cap,
            lookback: Duration::from_secs(self.general.lookback_seconds),
            ..SchedulerConfig::default()
        }
    }

    pub fn clips_db_path(&self) -> PathBuf {
        self.storage
            .clips_db
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("clips.sqlite"))
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".clipmark").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".clipmark").join("data")
}

#[cfg(test)]
mod tests {
    use super::ClipmarkConfig;

    fn parse(contents: &str) -> ClipmarkConfig {
        toml::from_str(contents).expect("parse config")
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = parse(
            r#"
[keys]
youtube_api_key = "yt-key"
"#,
        );
        cfg.validate().expect("valid");
        assert_eq!(cfg.general.poll_interval_seconds, 30);
        assert_eq!(cfg.general.ledger_capacity, 500);
        assert_eq!(cfg.server.port, 8787);
        assert!(cfg.report.append_url.is_none());
        assert_eq!(cfg.channels.default.short_name, "DEF");
        assert!(cfg.channels.routes.is_empty());
    }

    #[test]
    fn channel_routes_parse_with_overrides() {
        let cfg = parse(
            r#"
[keys]
youtube_api_key = "yt-key"

[channels.default]
sheet_id = "sheet-default"

[channels.routes.UC123]
name = "TechWithJoshi"
short_name = "TWJ"
sheet_id = "sheet-twj"
lookback_seconds = 45
auto_clip = false
"#,
        );
        let route = cfg.channels.routes.get("UC123").expect("route");
        assert_eq!(route.name, "TechWithJoshi");
        assert_eq!(route.lookback_seconds, Some(45));
        assert!(!route.auto_clip);
        assert_eq!(cfg.channels.default.sheet_id.as_deref(), Some("sheet-default"));
    }

    #[test]
    fn validate_rejects_missing_key_and_zero_intervals() {
        let missing_key = parse("[general]\npoll_interval_seconds = 30\n");
        assert!(missing_key.validate().is_err());

        let zero_interval = parse(
            r#"
[keys]
youtube_api_key = "yt-key"

[general]
poll_interval_seconds = 0
"#,
        );
        assert!(zero_interval.validate().is_err());

        let zero_ledger = parse(
            r#"
[keys]
youtube_api_key = "yt-key"

[general]
ledger_capacity = 0
"#,
        );
        assert!(zero_ledger.validate().is_err());
    }

    #[test]
    fn scheduler_config_maps_durations() {
        let cfg = parse(
            r#"
[keys]
youtube_api_key = "yt-key"

[general]
poll_interval_seconds = 10
rate_limit_delay_seconds = 240
error_cap = 3
"#,
        );
        let sched = cfg.scheduler_config();
        assert_eq!(sched.poll_interval.as_secs(), 10);
        assert_eq!(sched.rate_limit_delay.as_secs(), 240);
        assert_eq!(sched.error_cap, 3);
        assert_eq!(sched.retry_delay.as_secs(), 30);
    }
}
