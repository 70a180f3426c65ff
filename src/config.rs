//! Service configuration: a handful of tunables with `Default`s overridable
//! by environment variables, plus the one in-scope CLI flag.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;

use crate::controller::parse_force_rotation;

/// MQTT connection settings are collaborator-level — an external bridge
/// reads these, the core never does. Kept here only so their presence is
/// documented rather than silently dropped.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publish_prefix: Option<String>,
}

impl MqttSettings {
    fn from_env() -> Self {
        Self {
            broker: std::env::var("MQTT_BROKER").ok(),
            client_id: std::env::var("MQTT_CLIENT_ID").ok(),
            username: std::env::var("MQTT_USERNAME").ok(),
            password: std::env::var("MQTT_PASSWORD").ok(),
            publish_prefix: std::env::var("MQTT_PUBLISH_PREFIX").ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_port: u16,
    pub wall_cluster_dist_mm: f64,
    pub wall_confidence_threshold: f64,
    pub floor_cluster_dist_mm: f64,
    pub min_recalibration_interval_secs: i64,
    pub calibration_cache_path: PathBuf,
    pub unified_map_cache_path: PathBuf,
    pub force_rotation_deg: HashMap<String, f64>,
    pub mqtt: MqttSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            wall_cluster_dist_mm: 50.0,
            wall_confidence_threshold: 0.5,
            floor_cluster_dist_mm: 100.0,
            min_recalibration_interval_secs: 30 * 60,
            calibration_cache_path: PathBuf::from("calibration.json"),
            unified_map_cache_path: PathBuf::from("unified_map.json"),
            force_rotation_deg: HashMap::new(),
            mqtt: MqttSettings { broker: None, client_id: None, username: None, password: None, publish_prefix: None },
        }
    }
}

impl Config {
    /// Builds config from defaults, environment overrides, and parsed CLI
    /// arguments (`std::env::args()`).
    pub fn load() -> Self {
        Self::from_args(Cli::parse())
    }

    fn from_args(cli: Cli) -> Self {
        let mut config = Config::default();
        config.mqtt = MqttSettings::from_env();

        if let Ok(port) = std::env::var("WS_PORT") {
            if let Ok(port) = port.parse() {
                config.ws_port = port;
            }
        }
        if let Ok(path) = std::env::var("CALIBRATION_CACHE_PATH") {
            config.calibration_cache_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("UNIFIED_MAP_CACHE_PATH") {
            config.unified_map_cache_path = PathBuf::from(path);
        }

        if let Some(spec) = cli.force_rotation {
            config.force_rotation_deg = parse_force_rotation(&spec);
        }

        config
    }
}

#[derive(Parser, Debug)]
#[command(about = "Multi-robot map fusion service")]
struct Cli {
    /// Force a fixed rotation offset (degrees) for one or more robots:
    /// "id=deg,id2=deg2". Malformed entries are silently skipped.
    #[arg(long)]
    force_rotation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_forced_rotation() {
        let config = Config::default();
        assert!(config.force_rotation_deg.is_empty());
    }

    #[test]
    fn cli_force_rotation_flag_is_parsed() {
        let cli = Cli { force_rotation: Some("robot1=90,robot2=180".to_string()) };
        let config = Config::from_args(cli);
        assert_eq!(config.force_rotation_deg.get("robot1"), Some(&90.0));
        assert_eq!(config.force_rotation_deg.get("robot2"), Some(&180.0));
    }
}
