//! Configuration system for the temperature relay
//!
//! All deployment constants (broker, topics, endpoint, intervals) live in a TOML
//! file. Secrets are never stored in the file: the file names the environment
//! variables that hold them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Main relay configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub publisher: PublisherSection,
    #[serde(default)]
    pub router: RouterSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub sensor: SensorSection,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Display name placed in the `user` field of temperature reports
    pub display_name: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Topic filter the relay listens on
    pub input_topic: String,
    /// Topic for temperature reports and model replies
    pub output_topic: String,
    /// Last-will payload published by the broker on unexpected disconnect
    #[serde(default = "default_will_message")]
    pub will_message: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Packet buffer size in bytes, applied to both directions
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

fn default_will_message() -> String {
    "Goodbye!".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_buffer_size() -> usize {
    1024
}

fn default_client_id_prefix() -> String {
    "rtthread".to_string()
}

/// Periodic publisher timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Grace period before the first connection attempt
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_startup_delay() -> u64 {
    10
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            startup_delay_secs: default_startup_delay(),
        }
    }
}

/// Inbound message routing policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterSection {
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Every Nth plain message is forwarded as a prompt
    #[serde(default = "default_trigger_threshold")]
    pub trigger_threshold: u32,
    #[serde(default = "default_prompt_max_bytes")]
    pub prompt_max_bytes: usize,
    /// Pending model requests before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_command_prefix() -> String {
    "/model".to_string()
}

fn default_trigger_threshold() -> u32 {
    10
}

fn default_prompt_max_bytes() -> usize {
    63
}

fn default_queue_capacity() -> usize {
    16
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            trigger_threshold: default_trigger_threshold(),
            prompt_max_bytes: default_prompt_max_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Chat-completion endpoint section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Full URL of the chat-completions endpoint
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Environment variable containing API key
    pub api_key_env: String,
    /// Style instruction sent as the first user turn
    pub style_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    128
}

fn default_temperature() -> f32 {
    1.0
}

fn default_timeout_secs() -> u64 {
    30
}

/// Temperature sensor driver selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum SensorSection {
    /// Millidegree file such as `/sys/class/thermal/thermal_zone0/temp`
    ThermalZone {
        #[serde(default = "default_thermal_path")]
        path: String,
    },
    /// Synthetic readings for hosts without hardware
    Simulated {
        #[serde(default = "default_base_celsius")]
        base_celsius: f32,
    },
}

fn default_thermal_path() -> String {
    "/sys/class/thermal/thermal_zone0/temp".to_string()
}

fn default_base_celsius() -> f32 {
    25.0
}

impl Default for SensorSection {
    fn default() -> Self {
        Self::ThermalZone {
            path: default_thermal_path(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;

        if self.mqtt.input_topic.is_empty() {
            return Err(invalid("mqtt.input_topic must not be empty"));
        }
        if self.mqtt.output_topic.is_empty() {
            return Err(invalid("mqtt.output_topic must not be empty"));
        }
        if self.mqtt.output_topic.contains(['+', '#']) {
            return Err(invalid(format!(
                "mqtt.output_topic '{}' must not contain wildcards",
                self.mqtt.output_topic
            )));
        }
        if self.mqtt.buffer_size == 0 {
            return Err(invalid("mqtt.buffer_size must be greater than 0"));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(invalid("mqtt.keep_alive_secs must be greater than 0"));
        }
        if self.publisher.interval_ms == 0 {
            return Err(invalid("publisher.interval_ms must be greater than 0"));
        }
        if self.router.command_prefix.is_empty() {
            return Err(invalid("router.command_prefix must not be empty"));
        }
        if self.router.trigger_threshold == 0 {
            return Err(invalid("router.trigger_threshold must be greater than 0"));
        }
        if self.router.prompt_max_bytes == 0 {
            return Err(invalid("router.prompt_max_bytes must be greater than 0"));
        }
        if self.router.queue_capacity == 0 {
            return Err(invalid("router.queue_capacity must be greater than 0"));
        }

        let endpoint = Url::parse(&self.llm.endpoint)
            .map_err(|e| invalid(format!("llm.endpoint '{}': {e}", self.llm.endpoint)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "llm.endpoint must use http or https, got '{}'",
                endpoint.scheme()
            )));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature must be between 0.0 and 2.0"));
        }

        Ok(())
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.llm.api_key_env)
            .map_err(|_| ConfigError::EnvVarNotFound(self.llm.api_key_env.clone()))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
display_name = "test-device"

[mqtt]
broker_url = "mqtt://localhost:1883"
input_topic = "danmaku/test"
output_topic = "danmaku/test"

[llm]
endpoint = "http://localhost:9/api/paas/v4/chat/completions"
model = "glm-4.6"
api_key_env = "RELAY_TEST_API_KEY"
style_prompt = "Reply briefly."

[sensor]
driver = "simulated"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}

/// Accept the schemes the MQTT transport knows how to dial
fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url = Url::parse(broker_url)
        .map_err(|e| invalid(format!("mqtt.broker_url '{broker_url}': {e}")))?;

    if !matches!(url.scheme(), "mqtt" | "mqtts" | "tcp") {
        return Err(invalid(format!(
            "mqtt.broker_url scheme must be mqtt, mqtts or tcp, got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(invalid(format!("mqtt.broker_url '{broker_url}' has no host")));
    }

    Ok(())
}
