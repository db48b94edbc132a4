use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{KdcError, Result};
use crate::records::RecordCodes;

/// Top-level daemon configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub kdc: KdcConfig,
    pub server: ServerConfig,
    pub records: RecordCodesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// "sqlite" or "mariadb"
    #[serde(rename = "type")]
    pub db_type: String,
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            db_type: "sqlite".to_string(),
            dsn: "keymaster.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KdcConfig {
    /// Zone under which KMCTRL lives and KMREQ/MANIFEST/CHUNK arrive
    pub control_zone: String,

    /// DNSSEC algorithm number for generated keys (15 = ED25519)
    pub default_algorithm: u8,

    /// How often the rotation sweeper looks for keys to roll
    #[serde(deserialize_with = "de_duration")]
    pub key_rotation_interval: Duration,

    /// Standby keys to keep per zone
    pub standby_key_count: u32,

    /// Hold between published and standby
    #[serde(deserialize_with = "de_duration")]
    pub publish_time: Duration,

    /// Hold between retired and removed
    #[serde(deserialize_with = "de_duration")]
    pub retire_time: Duration,

    /// TTL on pending distributions before they are considered stale
    #[serde(deserialize_with = "de_duration")]
    pub distribution_ttl: Duration,

    /// Maximum bytes per CHUNK record payload
    pub jsonchunk_max_size: usize,
}

impl Default for KdcConfig {
    fn default() -> Self {
        KdcConfig {
            control_zone: "kdc.example.net.".to_string(),
            default_algorithm: 15,
            key_rotation_interval: Duration::from_secs(30 * 24 * 3600),
            standby_key_count: 1,
            publish_time: Duration::from_secs(2 * 3600),
            retire_time: Duration::from_secs(48 * 3600),
            distribution_ttl: Duration::from_secs(5 * 60),
            jsonchunk_max_size: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub dns_bind: SocketAddr,
    pub http_bind: SocketAddr,

    /// Static API token; empty disables authentication
    pub api_token: String,

    /// Per-destination NOTIFY exchange timeout
    #[serde(deserialize_with = "de_duration")]
    pub notify_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            dns_bind: "0.0.0.0:5399".parse().unwrap(),
            http_bind: "127.0.0.1:8093".parse().unwrap(),
            api_token: String::new(),
            notify_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordCodesConfig {
    pub kmctrl: u16,
    pub kmreq: u16,
    pub kmpkg: u16,
    pub manifest: u16,
    pub chunk: u16,
}

impl Default for RecordCodesConfig {
    fn default() -> Self {
        let codes = RecordCodes::default();
        RecordCodesConfig {
            kmctrl: codes.kmctrl,
            kmreq: codes.kmreq,
            kmpkg: codes.kmpkg,
            manifest: codes.manifest,
            chunk: codes.chunk,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KdcError::ConfigParseError(format!("{}: {}", path, e)))?;
        let config: Config =
            toml::from_str(&text).map_err(|e| KdcError::ConfigParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.database.db_type.as_str() {
            "sqlite" | "mariadb" => {}
            other => {
                return Err(KdcError::ConfigParseError(format!(
                    "unknown database type: {}",
                    other
                )));
            }
        }
        if self.kdc.control_zone.trim_end_matches('.').is_empty() {
            return Err(KdcError::ConfigParseError(
                "control_zone must not be empty".to_string(),
            ));
        }
        if self.kdc.jsonchunk_max_size == 0 {
            return Err(KdcError::ConfigParseError(
                "jsonchunk_max_size must be greater than zero".to_string(),
            ));
        }
        self.record_codes().validate()?;
        Ok(())
    }

    pub fn record_codes(&self) -> RecordCodes {
        RecordCodes {
            kmctrl: self.records.kmctrl,
            kmreq: self.records.kmreq,
            kmpkg: self.records.kmpkg,
            manifest: self.records.manifest,
            chunk: self.records.chunk,
        }
    }
}

/// Accepts "45s", "5m", "2h", "30d" or a bare number of seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(KdcError::InvalidDuration(text.to_string()));
    }
    let (number, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => text.split_at(idx),
        None => (text, "s"),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| KdcError::InvalidDuration(text.to_string()))?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return Err(KdcError::InvalidDuration(text.to_string())),
    };
    Ok(Duration::from_secs(seconds))
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}
