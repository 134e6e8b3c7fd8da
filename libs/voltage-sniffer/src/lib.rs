//! VoltageEMS Modbus RTU Sniffer
//!
//! Passive listener for an RS-485 Modbus RTU bus. The sniffer never
//! transmits: it recovers frames from line timing, pairs each request with
//! the response that follows it, and turns register reads and writes into
//! `(slave, register, value)` observations for subscribed sensors.
//!
//! # Architecture
//!
//! - [`source`] - receive-only byte sources (serial port, any `AsyncRead`)
//! - [`detector`] - timing-based frame boundary detection with CRC check
//! - [`splitter`] - request/response pair decoding (FC03, FC04, FC06, FC16)
//! - [`sniffer`] - request/response state machine
//! - [`publisher`] - routing observations to register and bit sensors
//! - [`config`] - figment-based configuration

pub mod config;
pub mod constants;
pub mod crc;
pub mod detector;
pub mod error;
pub mod frame;
pub mod publisher;
pub mod sniffer;
pub mod source;
pub mod splitter;

pub use config::{
    Parity, PublisherConfig, SensorConfig, SerialConfig, SnifferConfig, TimingConfig,
};
pub use detector::{Detection, DetectorStats, FrameDetector, FrameStage};
pub use error::{Result, SnifferError};
pub use frame::{Direction, Frame, FunctionCode, ModbusData};
pub use publisher::{BinarySensor, DataPublisher, ObservationSink, RegisterSensor};
pub use sniffer::{ModbusSniffer, SnifferState, SnifferStats, SnifferTimeouts};
pub use source::{open_serial, ByteSource, StreamByteSource};
pub use splitter::split;
