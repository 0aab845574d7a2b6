use std::collections::BTreeMap;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown timezone {0:?}")]
    Timezone(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinConfig {
    pub chip: String,
    pub relay: u32,
    pub switch: u32,
    pub motion: u32,
    pub poll_interval_ms: u64,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".to_string(),
            relay: 17,
            switch: 27,
            motion: 25,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorConfig {
    pub w1_dir: String,
    pub sample_interval_ms: u64,
    pub upload_interval_ms: u64,
    /// 1-Wire device id to the location name it is published under.
    pub locations: BTreeMap<String, String>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            w1_dir: "/sys/bus/w1/devices".to_string(),
            sample_interval_ms: 60_000,
            upload_interval_ms: 300_000,
            locations: BTreeMap::from([
                ("28-0416a4a2abff".to_string(), "balcony".to_string()),
                ("28-0416a4a40cff".to_string(), "bedroom".to_string()),
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub timezone: String,
    pub data_dir: String,
    pub http_port: u16,
    pub state_publish_interval_ms: u64,
    pub pins: PinConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Vancouver".to_string(),
            data_dir: "./.lamp".to_string(),
            http_port: 8000,
            state_publish_interval_ms: 10_000,
            pins: PinConfig::default(),
            mqtt: MqttConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Applies overrides from `lookup` (normally `std::env::var`).
    /// Values that fail to parse keep the current setting.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());
        let port = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u16>().ok());

        if let Some(dir) = lookup("LAMP_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Some(timezone) = lookup("LAMP_TIMEZONE") {
            self.timezone = timezone;
        }
        if let Some(http_port) = port("LAMP_HTTP_PORT") {
            self.http_port = http_port;
        }
        if let Some(chip) = lookup("LAMP_GPIO_CHIP") {
            self.pins.chip = chip;
        }
        if let Some(interval) = number("LAMP_POLL_INTERVAL_MS") {
            self.pins.poll_interval_ms = interval;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.enabled = true;
            self.mqtt.host = host;
        }
        if let Some(mqtt_port) = port("MQTT_PORT") {
            self.mqtt.port = mqtt_port;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.mqtt.user = user;
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.mqtt.pass = pass;
        }
        if let Some(dir) = lookup("LAMP_W1_DIR") {
            self.sensor.w1_dir = dir;
        }
        self
    }

    pub fn sanitize(&mut self) {
        self.pins.poll_interval_ms = self.pins.poll_interval_ms.clamp(10, 1_000);
        self.state_publish_interval_ms = self.state_publish_interval_ms.clamp(1_000, 3_600_000);
        self.sensor.sample_interval_ms = self.sensor.sample_interval_ms.clamp(1_000, 3_600_000);
        self.sensor.upload_interval_ms = self.sensor.upload_interval_ms.clamp(1_000, 86_400_000);
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }
}
