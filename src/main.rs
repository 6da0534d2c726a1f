//! Temperature relay - Main Entry Point
//!
//! Publishes sensor readings over MQTT and relays chat prompts from the input
//! topic to the configured model endpoint.

use clap::{Parser, Subcommand};
use mqtt_temp_relay::config::{ConfigError, RelayConfig};
use mqtt_temp_relay::error::{RelayError, RelayResult};
use mqtt_temp_relay::llm::{ChatCompletionsConfig, ChatCompletionsProvider, LlmProvider};
use mqtt_temp_relay::observability::init_default_logging;
use mqtt_temp_relay::relay::{wall_clock, RelayLifecycle, TemperatureReport};
use mqtt_temp_relay::sensor::SensorReader;
use mqtt_temp_relay::transport::mqtt::MqttClient;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// MQTT temperature publisher with LLM reply relay
#[derive(Parser)]
#[command(name = "mqtt-temp-relay")]
#[command(about = "Publish temperature readings over MQTT and relay chat prompts to an LLM")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Read the sensor once and print the report that would be published
    Sensor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // -v flags only raise the level when LOG_LEVEL is not set explicitly
    if std::env::var("LOG_LEVEL").is_err() {
        match cli.verbose {
            0 => {}
            1 => std::env::set_var("LOG_LEVEL", "debug"),
            _ => std::env::set_var("LOG_LEVEL", "trace"),
        }
    }
    init_default_logging();

    info!("Starting mqtt-temp-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e.sanitized());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::Config { show } => handle_config_command(config, show),
        Commands::Sensor => handle_sensor_command(config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.sanitized());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> RelayResult<RelayConfig> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(RelayConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["relay.toml", "config/relay.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(RelayConfig::load_from_file(&path)?);
                }
            }

            Err(ConfigError::InvalidConfig(
                "No configuration file found. Provide one with -c/--config or create relay.toml"
                    .to_string(),
            )
            .into())
        }
    }
}

/// Wire the transport, provider and sensor into a lifecycle
fn build_relay(config: RelayConfig) -> RelayResult<RelayLifecycle<MqttClient>> {
    let transport = MqttClient::new(config.mqtt.clone()).map_err(RelayError::transport)?;

    let api_key = config.get_llm_api_key()?;
    let provider: Arc<dyn LlmProvider> = Arc::new(ChatCompletionsProvider::new(
        ChatCompletionsConfig::from_section(&config.llm, api_key),
    )?);

    let sensor = SensorReader::from_config(&config.sensor);

    Ok(RelayLifecycle::new(config, transport, provider, sensor))
}

async fn run_relay(config: RelayConfig) -> RelayResult<()> {
    info!(
        device = %config.device.display_name,
        broker = %config.mqtt.broker_url,
        "Relay starting"
    );

    let relay = Arc::new(build_relay(config)?);
    let autostart = relay.schedule_autostart();

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| RelayError::internal(format!("SIGINT handler setup failed: {e}")))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| RelayError::internal(format!("SIGTERM handler setup failed: {e}")))?;

    info!("Relay is running, waiting for shutdown signal...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    relay.shutdown().await?;
    if let Err(e) = autostart.await {
        error!("Autostart task ended abnormally: {}", e);
    }

    Ok(())
}

fn handle_config_command(config: RelayConfig, show: bool) -> RelayResult<()> {
    if show {
        let rendered = toml::to_string_pretty(&config)
            .map_err(|e| RelayError::internal(format!("config rendering failed: {e}")))?;
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}

fn handle_sensor_command(config: RelayConfig) -> RelayResult<()> {
    let mut sensor = SensorReader::from_config(&config.sensor);
    let celsius = sensor.read()?;

    let report = TemperatureReport::new(&config.device.display_name, wall_clock(), celsius);
    println!("{}", String::from_utf8_lossy(&report.to_payload()?));
    Ok(())
}
