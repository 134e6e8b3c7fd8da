//! Register observation publishing
//!
//! Observations are keyed by `(slave address, register address)`. Each key
//! may carry any number of subscriptions: a whole-register sensor receives
//! the raw value, a binary sensor receives one bit of it. Sensors are
//! `watch` receivers, so a slow consumer only ever sees the latest value.

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{info, trace};

use crate::constants::MAX_REGISTER_BIT;
use crate::error::{Result, SnifferError};
use crate::frame::ModbusData;

/// Consumer of decoded register observations
pub trait ObservationSink: Send + Sync {
    fn deliver(&self, device_address: u8, data: ModbusData);
}

enum Subscription {
    Register(watch::Sender<Option<u16>>),
    Bit {
        bit: u8,
        tx: watch::Sender<Option<bool>>,
    },
}

impl Subscription {
    fn publish(&self, data: &ModbusData) {
        match self {
            Subscription::Register(tx) => {
                tx.send_replace(Some(data.value));
            },
            Subscription::Bit { bit, tx } => {
                tx.send_replace(data.bit(*bit));
            },
        }
    }
}

/// Latest value of one register
#[derive(Debug, Clone)]
pub struct RegisterSensor {
    device: u8,
    register: u16,
    rx: watch::Receiver<Option<u16>>,
}

impl RegisterSensor {
    pub fn device(&self) -> u8 {
        self.device
    }

    pub fn register(&self) -> u16 {
        self.register
    }

    /// Last observed value, `None` until the register was seen on the bus
    pub fn value(&self) -> Option<u16> {
        *self.rx.borrow()
    }

    /// Wait for the next publication and return it
    pub async fn changed(&mut self) -> Result<Option<u16>> {
        self.rx
            .changed()
            .await
            .map_err(|_| SnifferError::internal("Publisher dropped"))?;
        Ok(*self.rx.borrow_and_update())
    }
}

/// Latest state of one bit of a register
#[derive(Debug, Clone)]
pub struct BinarySensor {
    device: u8,
    register: u16,
    bit: u8,
    rx: watch::Receiver<Option<bool>>,
}

impl BinarySensor {
    pub fn device(&self) -> u8 {
        self.device
    }

    pub fn register(&self) -> u16 {
        self.register
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    pub fn state(&self) -> Option<bool> {
        *self.rx.borrow()
    }

    pub async fn changed(&mut self) -> Result<Option<bool>> {
        self.rx
            .changed()
            .await
            .map_err(|_| SnifferError::internal("Publisher dropped"))?;
        Ok(*self.rx.borrow_and_update())
    }
}

/// Routes observations to the sensors subscribed to them
pub struct DataPublisher {
    subscriptions: DashMap<(u8, u16), Vec<Subscription>>,
    log_not_configured_data: bool,
}

impl DataPublisher {
    pub fn new(log_not_configured_data: bool) -> Self {
        Self {
            subscriptions: DashMap::new(),
            log_not_configured_data,
        }
    }

    /// Subscribe to the full value of a register
    pub fn add_register_sensor(&self, device: u8, register: u16) -> RegisterSensor {
        let (tx, rx) = watch::channel(None);
        self.subscriptions
            .entry((device, register))
            .or_default()
            .push(Subscription::Register(tx));
        RegisterSensor {
            device,
            register,
            rx,
        }
    }

    /// Subscribe to one bit (0 = LSB) of a register
    pub fn add_binary_sensor(&self, device: u8, register: u16, bit: u8) -> Result<BinarySensor> {
        if bit > MAX_REGISTER_BIT {
            return Err(SnifferError::config(format!(
                "Bit {} out of range 0-{} for slave {} register {}",
                bit, MAX_REGISTER_BIT, device, register
            )));
        }

        let (tx, rx) = watch::channel(None);
        self.subscriptions
            .entry((device, register))
            .or_default()
            .push(Subscription::Bit { bit, tx });
        Ok(BinarySensor {
            device,
            register,
            bit,
            rx,
        })
    }

    pub fn is_configured(&self, device: u8, register: u16) -> bool {
        self.subscriptions.contains_key(&(device, register))
    }

    /// Total number of sensors across all registers
    pub fn sensor_count(&self) -> usize {
        self.subscriptions.iter().map(|entry| entry.value().len()).sum()
    }
}

impl ObservationSink for DataPublisher {
    fn deliver(&self, device_address: u8, data: ModbusData) {
        match self.subscriptions.get(&(device_address, data.address)) {
            Some(subscriptions) => {
                for subscription in subscriptions.iter() {
                    subscription.publish(&data);
                }
            },
            None if self.log_not_configured_data => {
                info!(
                    "Not configured: slave={} register={} value={} (0x{:04X})",
                    device_address, data.address, data.value, data.value
                );
            },
            None => {
                trace!(
                    "Not configured: slave={} register={} value={}",
                    device_address,
                    data.address,
                    data.value
                );
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_register_sensor_receives_value() {
        let publisher = DataPublisher::new(false);
        let sensor = publisher.add_register_sensor(1, 0);
        assert_eq!(sensor.value(), None);

        publisher.deliver(1, ModbusData::new(0, 0x1234));
        assert_eq!(sensor.value(), Some(0x1234));
        assert_eq!(sensor.device(), 1);
        assert_eq!(sensor.register(), 0);
    }

    #[test]
    fn test_routing_by_device_and_register() {
        let publisher = DataPublisher::new(false);
        let a = publisher.add_register_sensor(1, 10);
        let b = publisher.add_register_sensor(2, 10);

        publisher.deliver(2, ModbusData::new(10, 7));
        publisher.deliver(1, ModbusData::new(11, 9));

        assert_eq!(a.value(), None);
        assert_eq!(b.value(), Some(7));
    }

    #[test]
    fn test_binary_sensor_tracks_bit() {
        let publisher = DataPublisher::new(false);
        let running = publisher.add_binary_sensor(17, 5, 3).unwrap();
        let alarm = publisher.add_binary_sensor(17, 5, 15).unwrap();
        let raw = publisher.add_register_sensor(17, 5);
        assert_eq!(publisher.sensor_count(), 3);

        publisher.deliver(17, ModbusData::new(5, 0b0000_0000_0000_1000));
        assert_eq!(running.state(), Some(true));
        assert_eq!(alarm.state(), Some(false));
        assert_eq!(raw.value(), Some(8));

        publisher.deliver(17, ModbusData::new(5, 0x8000));
        assert_eq!(running.state(), Some(false));
        assert_eq!(alarm.state(), Some(true));
        assert_eq!(running.bit(), 3);
    }

    #[test]
    fn test_binary_sensor_bit_out_of_range() {
        let publisher = DataPublisher::new(false);
        let err = publisher.add_binary_sensor(1, 0, 16).unwrap_err();
        assert!(matches!(err, SnifferError::Config(_)));
        assert!(!publisher.is_configured(1, 0));
    }

    #[tokio::test]
    async fn test_sensor_changed_notification() {
        let publisher = DataPublisher::new(false);
        let mut sensor = publisher.add_register_sensor(3, 40);

        publisher.deliver(3, ModbusData::new(40, 500));
        assert_eq!(sensor.changed().await.unwrap(), Some(500));

        drop(publisher);
        assert!(sensor.changed().await.is_err());
    }

    #[test]
    #[traced_test]
    fn test_unconfigured_data_logged_when_enabled() {
        let publisher = DataPublisher::new(true);
        publisher.deliver(9, ModbusData::new(100, 42));
        assert!(logs_contain("Not configured: slave=9 register=100 value=42"));
    }
}
