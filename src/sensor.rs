//! Temperature sensor access
//!
//! [`SensorReader`] wraps a [`TemperatureDriver`] and performs the driver's
//! one-time initialization lazily on first use. Two drivers ship with the
//! crate: a Linux thermal-zone file reader and a simulated source.

use crate::config::SensorSection;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Sensor driver errors
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor initialization failed: {0}")]
    InitFailed(String),
    #[error("Sensor read failed: {0}")]
    ReadFailed(String),
    #[error("Sensor returned malformed data: {0}")]
    Malformed(String),
}

/// Hardware abstraction for a single temperature source
pub trait TemperatureDriver: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Bring the device up; called until it succeeds once
    fn init(&mut self) -> Result<(), SensorError>;

    /// Read the current temperature in degrees Celsius
    fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

/// Lazily initialized sensor handle
pub struct SensorReader {
    driver: Box<dyn TemperatureDriver>,
    ready: bool,
}

impl SensorReader {
    pub fn new(driver: Box<dyn TemperatureDriver>) -> Self {
        Self {
            driver,
            ready: false,
        }
    }

    /// Build the reader selected by the `[sensor]` configuration section
    pub fn from_config(section: &SensorSection) -> Self {
        let driver: Box<dyn TemperatureDriver> = match section {
            SensorSection::ThermalZone { path } => Box::new(ThermalZoneDriver::new(path)),
            SensorSection::Simulated { base_celsius } => {
                Box::new(SimulatedDriver::new(*base_celsius))
            }
        };
        Self::new(driver)
    }

    /// Initialize the driver once; later calls are no-ops after a success
    pub fn ensure_ready(&mut self) -> Result<(), SensorError> {
        if self.ready {
            return Ok(());
        }

        self.driver.init()?;
        self.ready = true;
        info!(driver = self.driver.name(), "Temperature sensor ready");
        Ok(())
    }

    /// Read the current temperature, initializing the driver if needed
    pub fn read(&mut self) -> Result<f32, SensorError> {
        self.ensure_ready()?;
        let celsius = self.driver.read_celsius()?;
        debug!(driver = self.driver.name(), celsius, "Temperature sampled");
        Ok(celsius)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Reads an integer millidegree value from a sysfs-style file
pub struct ThermalZoneDriver {
    path: PathBuf,
}

impl ThermalZoneDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Convert the file contents to degrees Celsius (pure function)
    pub fn parse_millidegrees(raw: &str) -> Result<f32, SensorError> {
        let trimmed = raw.trim();
        let millis: i64 = trimmed
            .parse()
            .map_err(|_| SensorError::Malformed(format!("expected millidegrees, got '{trimmed}'")))?;
        Ok(millis as f32 / 1000.0)
    }
}

impl TemperatureDriver for ThermalZoneDriver {
    fn name(&self) -> &str {
        "thermal_zone"
    }

    fn init(&mut self) -> Result<(), SensorError> {
        std::fs::metadata(&self.path)
            .map_err(|e| SensorError::InitFailed(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }

    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| SensorError::ReadFailed(format!("{}: {e}", self.path.display())))?;
        Self::parse_millidegrees(&raw)
    }
}

/// Sine wave of ±5 °C with a 60 s period around a base temperature
pub struct SimulatedDriver {
    base_celsius: f32,
    started: Option<Instant>,
}

impl SimulatedDriver {
    pub fn new(base_celsius: f32) -> Self {
        Self {
            base_celsius,
            started: None,
        }
    }

    /// Temperature at a given offset from driver start (pure function)
    pub fn value_at(base_celsius: f32, elapsed_secs: f32) -> f32 {
        base_celsius + 5.0 * (elapsed_secs * std::f32::consts::TAU / 60.0).sin()
    }
}

impl TemperatureDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        let started = self
            .started
            .ok_or_else(|| SensorError::ReadFailed("driver not initialized".to_string()))?;
        Ok(Self::value_at(
            self.base_celsius,
            started.elapsed().as_secs_f32(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockDriver;
    use std::io::Write;

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(ThermalZoneDriver::parse_millidegrees("42500\n").unwrap(), 42.5);
        assert_eq!(ThermalZoneDriver::parse_millidegrees("-1250").unwrap(), -1.25);
        assert!(matches!(
            ThermalZoneDriver::parse_millidegrees("hot"),
            Err(SensorError::Malformed(_))
        ));
    }

    #[test]
    fn test_thermal_zone_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "23125").unwrap();

        let mut reader = SensorReader::new(Box::new(ThermalZoneDriver::new(file.path())));
        assert_eq!(reader.read().unwrap(), 23.125);
        assert!(reader.is_ready());
    }

    #[test]
    fn test_thermal_zone_missing_file_fails_init() {
        let mut reader = SensorReader::new(Box::new(ThermalZoneDriver::new(
            "/nonexistent/thermal_zone0/temp",
        )));
        assert!(matches!(reader.read(), Err(SensorError::InitFailed(_))));
        assert!(!reader.is_ready());
    }

    #[test]
    fn test_ensure_ready_initializes_once() {
        let driver = MockDriver::with_readings(vec![21.0, 22.0]);
        let init_calls = driver.init_calls.clone();
        let mut reader = SensorReader::new(Box::new(driver));

        reader.ensure_ready().unwrap();
        reader.ensure_ready().unwrap();
        reader.read().unwrap();
        reader.read().unwrap();

        assert_eq!(*init_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_failed_init_is_retried() {
        let driver = MockDriver::failing_init(1);
        let init_calls = driver.init_calls.clone();
        let mut reader = SensorReader::new(Box::new(driver));

        assert!(reader.ensure_ready().is_err());
        assert!(reader.ensure_ready().is_ok());
        assert_eq!(*init_calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_simulated_values_stay_in_band() {
        for step in 0..120 {
            let value = SimulatedDriver::value_at(25.0, step as f32 * 0.5);
            assert!((20.0..=30.0).contains(&value), "value {value} out of band");
        }
        assert_eq!(SimulatedDriver::value_at(25.0, 0.0), 25.0);
    }

    #[test]
    fn test_from_config_simulated() {
        let mut reader = SensorReader::from_config(&SensorSection::Simulated { base_celsius: 10.0 });
        let value = reader.read().unwrap();
        assert!((5.0..=15.0).contains(&value));
    }
}
