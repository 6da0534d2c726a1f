//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading a relay configuration file:
//! defaults, overrides, validation failures and secret resolution.

use mqtt_temp_relay::config::{ConfigError, RelayConfig, SensorSection};
use std::io::Write;
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"
[device]
display_name = "无情的大佬A"

[mqtt]
broker_url = "tcp://192.168.1.232:1883"
input_topic = "danmaku/test"
output_topic = "danmaku/test"

[llm]
endpoint = "http://open.bigmodel.cn/api/paas/v4/chat/completions"
model = "glm-4.6"
api_key_env = "BIGMODEL_API_KEY"
style_prompt = "Reply in one short sentence."
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_minimal_toml() {
    let temp_file = write_config(MINIMAL);

    let config = RelayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.display_name, "无情的大佬A");
    assert_eq!(config.mqtt.broker_url, "tcp://192.168.1.232:1883");
    assert_eq!(config.mqtt.will_message, "Goodbye!");
    assert_eq!(config.mqtt.keep_alive_secs, 30);
    assert_eq!(config.mqtt.buffer_size, 1024);
    assert_eq!(config.publisher.interval_ms, 10_000);
    assert_eq!(config.publisher.startup_delay_secs, 10);
    assert_eq!(config.router.trigger_threshold, 10);
    assert_eq!(config.router.prompt_max_bytes, 63);
    assert_eq!(config.llm.max_tokens, 128);
    assert_eq!(config.llm.timeout_secs, 30);
    assert!(matches!(config.sensor, SensorSection::ThermalZone { .. }));
}

#[test]
fn test_config_overrides_defaults() {
    let content = format!(
        r#"{MINIMAL}
[publisher]
interval_ms = 2000
startup_delay_secs = 0

[router]
command_prefix = "/ask"
trigger_threshold = 3

[sensor]
driver = "simulated"
base_celsius = 30.0
"#
    );
    let temp_file = write_config(&content);

    let config = RelayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.publisher.interval_ms, 2000);
    assert_eq!(config.publisher.startup_delay_secs, 0);
    assert_eq!(config.router.command_prefix, "/ask");
    assert_eq!(config.router.trigger_threshold, 3);
    assert_eq!(config.router.queue_capacity, 16);
    assert_eq!(config.sensor, SensorSection::Simulated { base_celsius: 30.0 });
}

#[test]
fn test_config_missing_file_returns_file_read_error() {
    let result = RelayConfig::load_from_file(std::path::Path::new("/nonexistent/relay.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_malformed_toml_returns_parse_error() {
    let temp_file = write_config("[device\ndisplay_name = ");
    let result = RelayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_missing_required_section_returns_parse_error() {
    let temp_file = write_config("[device]\ndisplay_name = \"x\"\n");
    let result = RelayConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_invalid_values() {
    let cases = [
        MINIMAL.replace("tcp://192.168.1.232:1883", "http://192.168.1.232:1883"),
        MINIMAL.replace(
            "output_topic = \"danmaku/test\"",
            "output_topic = \"danmaku/+\"",
        ),
        MINIMAL.replace("input_topic = \"danmaku/test\"", "input_topic = \"\""),
        MINIMAL.replace(
            "http://open.bigmodel.cn/api/paas/v4/chat/completions",
            "ftp://open.bigmodel.cn/chat",
        ),
        format!("{MINIMAL}\n[router]\ntrigger_threshold = 0\n"),
        format!("{MINIMAL}\n[publisher]\ninterval_ms = 0\n"),
    ];

    for content in cases {
        let temp_file = write_config(&content);
        let result = RelayConfig::load_from_file(temp_file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "expected validation failure for:\n{content}"
        );
    }
}

#[test]
fn test_api_key_resolved_from_environment() {
    let content = MINIMAL.replace("BIGMODEL_API_KEY", "RELAY_IT_API_KEY_PRESENT");
    let config = RelayConfig::from_toml_str(&content).unwrap();

    std::env::set_var("RELAY_IT_API_KEY_PRESENT", "secret-key");
    assert_eq!(config.get_llm_api_key().unwrap(), "secret-key");
    std::env::remove_var("RELAY_IT_API_KEY_PRESENT");
}

#[test]
fn test_missing_api_key_is_reported_by_name() {
    let content = MINIMAL.replace("BIGMODEL_API_KEY", "RELAY_IT_API_KEY_ABSENT");
    let config = RelayConfig::from_toml_str(&content).unwrap();

    match config.get_llm_api_key() {
        Err(ConfigError::EnvVarNotFound(name)) => assert_eq!(name, "RELAY_IT_API_KEY_ABSENT"),
        other => panic!("expected EnvVarNotFound, got {other:?}"),
    }
}

#[test]
fn test_config_round_trips_through_show_output() {
    let config = RelayConfig::from_toml_str(MINIMAL).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    assert_eq!(RelayConfig::from_toml_str(&rendered).unwrap(), config);
}
