//! Configured sensors
//!
//! Each configured sensor gets a publisher subscription and a task that
//! logs its value whenever it changes.

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use voltage_sniffer::{BinarySensor, DataPublisher, RegisterSensor, SensorConfig};

/// Subscribed sensor, register or single bit
pub enum ConfiguredSensor {
    Register {
        name: String,
        sensor: RegisterSensor,
    },
    Binary {
        name: String,
        sensor: BinarySensor,
    },
}

impl ConfiguredSensor {
    pub fn name(&self) -> &str {
        match self {
            ConfiguredSensor::Register { name, .. } | ConfiguredSensor::Binary { name, .. } => {
                name
            },
        }
    }

    /// Current value rendered for logging, `None` before the first update
    pub fn current(&self) -> Option<String> {
        match self {
            ConfiguredSensor::Register { sensor, .. } => sensor.value().map(|v| v.to_string()),
            ConfiguredSensor::Binary { sensor, .. } => {
                sensor.state().map(|on| on_off(on).to_string())
            },
        }
    }

    /// Next rendered value, `None` once the publisher is gone
    async fn changed(&mut self) -> Option<String> {
        let result = match self {
            ConfiguredSensor::Register { sensor, .. } => sensor.changed().await.map(format_value),
            ConfiguredSensor::Binary { sensor, .. } => sensor
                .changed()
                .await
                .map(|state| format_value(state.map(on_off))),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Sensor '{}' stream ended: {}", self.name(), e);
                None
            },
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

fn format_value<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

/// Subscribe every configured sensor
pub fn subscribe(
    publisher: &DataPublisher,
    sensors: &[SensorConfig],
) -> anyhow::Result<Vec<ConfiguredSensor>> {
    sensors
        .iter()
        .map(|config| -> anyhow::Result<ConfiguredSensor> {
            let sensor = match config.bit {
                Some(bit) => ConfiguredSensor::Binary {
                    name: config.name.clone(),
                    sensor: publisher
                        .add_binary_sensor(config.device, config.register, bit)
                        .with_context(|| format!("Sensor '{}'", config.name))?,
                },
                None => ConfiguredSensor::Register {
                    name: config.name.clone(),
                    sensor: publisher.add_register_sensor(config.device, config.register),
                },
            };
            debug!(
                "Sensor '{}': slave={} register={} bit={:?}",
                config.name, config.device, config.register, config.bit
            );
            Ok(sensor)
        })
        .collect()
}

/// Spawn one change-logging task per sensor
pub fn spawn_loggers(
    sensors: Vec<ConfiguredSensor>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    sensors
        .into_iter()
        .map(|mut sensor| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut last: Option<String> = None;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        value = sensor.changed() => {
                            let Some(value) = value else { break };
                            if last.as_deref() != Some(value.as_str()) {
                                info!("{}: {}", sensor.name(), value);
                                last = Some(value);
                            }
                        }
                    }
                }
            })
        })
        .collect()
}
