// config.rs

use thiserror::Error;

pub const DEFAULT_NAME: &str = "DS18B20-Temp-Sensors";
pub const DEFAULT_PUBLISH_TOPIC: &str = "sensors/DS18B20";
pub const DEFAULT_CONTROL_TOPIC: &str = "esp32/output";

const DEFAULT_RESOLUTION_BITS: u8 = 12;
const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 5000;
const DEFAULT_LINK_RETRY_MS: u64 = 500;
const DEFAULT_SESSION_RETRY_MS: u64 = 5000;
const DEFAULT_SESSION_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_LOOP_IDLE_MS: u64 = 10;

// settle times required by the one-wire bus timing
const DEFAULT_BUS_SETTLE_MS: u64 = 1000;
const DEFAULT_SCAN_SETTLE_MS: u64 = 500;
const DEFAULT_DEVICE_SETTLE_MS: u64 = 100;

pub const MIN_RESOLUTION_BITS: u8 = 9;
pub const MAX_RESOLUTION_BITS: u8 = 12;

/// Fixed-interval retry. `max_attempts: None` retries forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval_ms: u64,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const fn forever(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            max_attempts: None,
        }
    }

    pub const fn limited(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts: Some(max_attempts),
        }
    }

    /// True once `attempts` failed tries have used up the ceiling.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("resolution must be {MIN_RESOLUTION_BITS}..={MAX_RESOLUTION_BITS} bits, got {0}")]
    Resolution(u8),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("publish interval must be non-zero")]
    PublishInterval,
}

#[derive(Clone, Debug)]
pub struct MyConfig {
    pub name: String,

    pub wifi_ssid: String,
    pub wifi_pass: String,

    pub mqtt_url: String,
    /// Empty means derive from the station MAC.
    pub mqtt_client_id: String,
    pub publish_topic: String,
    pub control_topic: String,

    pub resolution_bits: u8,
    pub publish_interval_ms: u64,
    pub loop_idle_ms: u64,

    pub link_retry: RetryPolicy,
    pub session_retry: RetryPolicy,
    pub session_connect_timeout_ms: u64,

    pub bus_settle_ms: u64,
    pub scan_settle_ms: u64,
    pub device_settle_ms: u64,
}

impl Default for MyConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.into(),

            wifi_ssid: option_env!("WIFI_SSID").unwrap_or("internet").into(),
            wifi_pass: option_env!("WIFI_PASS").unwrap_or("password").into(),

            mqtt_url: option_env!("MQTT_URL")
                .unwrap_or("mqtt://mqtt.local:1883")
                .into(),
            mqtt_client_id: String::new(),
            publish_topic: DEFAULT_PUBLISH_TOPIC.into(),
            control_topic: DEFAULT_CONTROL_TOPIC.into(),

            resolution_bits: DEFAULT_RESOLUTION_BITS,
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS,
            loop_idle_ms: DEFAULT_LOOP_IDLE_MS,

            link_retry: RetryPolicy::forever(DEFAULT_LINK_RETRY_MS),
            session_retry: RetryPolicy::forever(DEFAULT_SESSION_RETRY_MS),
            session_connect_timeout_ms: DEFAULT_SESSION_CONNECT_TIMEOUT_MS,

            bus_settle_ms: DEFAULT_BUS_SETTLE_MS,
            scan_settle_ms: DEFAULT_SCAN_SETTLE_MS,
            device_settle_ms: DEFAULT_DEVICE_SETTLE_MS,
        }
    }
}

impl MyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_RESOLUTION_BITS..=MAX_RESOLUTION_BITS).contains(&self.resolution_bits) {
            return Err(ConfigError::Resolution(self.resolution_bits));
        }
        if self.name.is_empty() {
            return Err(ConfigError::Empty("name"));
        }
        if self.wifi_ssid.is_empty() {
            return Err(ConfigError::Empty("wifi_ssid"));
        }
        if self.mqtt_url.is_empty() {
            return Err(ConfigError::Empty("mqtt_url"));
        }
        if self.publish_topic.is_empty() {
            return Err(ConfigError::Empty("publish_topic"));
        }
        if self.control_topic.is_empty() {
            return Err(ConfigError::Empty("control_topic"));
        }
        if self.publish_interval_ms == 0 {
            return Err(ConfigError::PublishInterval);
        }
        Ok(())
    }
}


// EOF
