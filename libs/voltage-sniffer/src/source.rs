//! Byte sources feeding the frame detector
//!
//! The detector only needs to know whether bytes are buffered, to pop one,
//! and to suspend until more arrive. Deadlines are applied by the caller
//! around [`ByteSource::wait_readable`], so the same protocol logic runs on a
//! serial port, a socket or a scripted test stream.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

use crate::config::SerialConfig;
use crate::error::{Result, SnifferError};

/// Bytes pulled from the underlying reader per wake-up
const READ_CHUNK_SIZE: usize = 128;

/// Receive-only byte source
///
/// The sniffer never writes to the bus, so the trait has no write side.
#[async_trait]
pub trait ByteSource: Send {
    /// Number of bytes that can be read without waiting
    fn bytes_available(&self) -> usize;

    /// Pop one buffered byte; `None` if nothing is buffered
    fn try_read_byte(&mut self) -> Option<u8>;

    /// Link speed in baud
    fn baud_rate(&self) -> u32;

    /// Suspend until at least one byte is buffered
    ///
    /// Must be cancel-safe: callers wrap it in a timeout and drop it when the
    /// deadline passes.
    async fn wait_readable(&mut self) -> Result<()>;
}

/// [`ByteSource`] over any tokio `AsyncRead`
#[derive(Debug)]
pub struct StreamByteSource<R> {
    reader: R,
    buffer: VecDeque<u8>,
    baud_rate: u32,
}

impl<R> StreamByteSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, baud_rate: u32) -> Self {
        Self {
            reader,
            buffer: VecDeque::with_capacity(READ_CHUNK_SIZE * 2),
            baud_rate,
        }
    }
}

#[async_trait]
impl<R> ByteSource for StreamByteSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn bytes_available(&self) -> usize {
        self.buffer.len()
    }

    fn try_read_byte(&mut self) -> Option<u8> {
        self.buffer.pop_front()
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    async fn wait_readable(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            return Ok(());
        }

        // AsyncReadExt::read is cancel-safe: either nothing was consumed or
        // the bytes are moved into the buffer before the next await.
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let bytes = self.reader.read(&mut chunk).await.map_err(|e| {
            error!("RTU RX: {}", e);
            SnifferError::io(format!("Serial read error: {e}"))
        })?;

        if bytes == 0 {
            return Err(SnifferError::connection("Byte source closed"));
        }

        self.buffer.extend(&chunk[..bytes]);
        Ok(())
    }
}

/// Open a serial port in listen-only mode
///
/// With `hold_rts_low` set, RTS is driven low once so an RS-485 transceiver
/// whose driver-enable follows RTS never drives the bus.
pub fn open_serial(config: &SerialConfig) -> Result<StreamByteSource<SerialStream>> {
    debug!("RTU: {} @{}baud", config.port, config.baud_rate);

    let mut port = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(config.tokio_data_bits())
        .parity(config.parity.into())
        .stop_bits(config.tokio_stop_bits())
        .open_native_async()
        .map_err(|e| {
            error!("RTU err: {} - {}", config.port, e);
            SnifferError::connection(format!("Failed to open serial port {}: {e}", config.port))
        })?;

    if config.hold_rts_low {
        port.write_request_to_send(false).map_err(|e| {
            SnifferError::connection(format!("Failed to release RTS on {}: {e}", config.port))
        })?;
        debug!("RTU RTS held low: {}", config.port);
    }

    info!("RTU opened (listen only): {}", config.port);
    Ok(StreamByteSource::new(port, config.baud_rate))
}
