//! Modbus RTU frame detector
//!
//! Recovers frame boundaries from a continuous byte stream using timing
//! alone. The sniffer is not the bus master, so it cannot use a request it
//! sent to predict what comes next; it reads the address and function code,
//! derives the payload layout from them, and accepts the candidate only when
//! the trailing CRC matches.
//!
//! Every byte after the first is gated by the same inter-byte gap, measured
//! from the previous byte. A transmission that stalls anywhere inside a
//! frame is abandoned, so the sniffer never blocks on half a frame.

use std::time::Duration;

use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use crate::constants::{
    BITS_PER_CHARACTER, FIXED_PAYLOAD_LEN, MAX_BAUD_RATE_FOR_DERIVED_GAP, MAX_RTU_FRAME_LEN,
    MIN_FRAME_GAP_US, MIN_INTER_BYTE_GAP_US, RTU_CRC_LEN, RTU_HEADER_LEN,
};
use crate::crc::crc16;
use crate::error::Result;
use crate::frame::{Direction, Frame, FunctionCode};
use crate::source::ByteSource;

/// Maximum delay tolerated between two bytes of one frame (t1.5)
///
/// Up to 19200 baud this is 1.5 character times of 11 bits, rounded to the
/// nearest microsecond. Above that the character time is so short that a
/// fixed floor is used instead.
pub fn inter_byte_gap_for(baud_rate: u32) -> Duration {
    derived_gap(baud_rate, 3, MIN_INTER_BYTE_GAP_US)
}

/// Bus silence separating two frames (t3.5)
pub fn frame_gap_for(baud_rate: u32) -> Duration {
    derived_gap(baud_rate, 7, MIN_FRAME_GAP_US)
}

/// `half_characters / 2` character times, or `floor_us` above 19200 baud
fn derived_gap(baud_rate: u32, half_characters: u32, floor_us: u64) -> Duration {
    if baud_rate == 0 || baud_rate > MAX_BAUD_RATE_FOR_DERIVED_GAP {
        return Duration::from_micros(floor_us);
    }
    let bits = f64::from(half_characters * BITS_PER_CHARACTER);
    let micros = (bits * 1_000_000.0 / f64::from(2 * baud_rate)).round();
    Duration::from_micros(micros as u64)
}

/// Part of a frame being read when the line went quiet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Address,
    Function,
    ByteCount,
    Data,
    Crc,
}

impl std::fmt::Display for FrameStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameStage::Address => "address",
            FrameStage::Function => "function",
            FrameStage::ByteCount => "byte count",
            FrameStage::Data => "data",
            FrameStage::Crc => "CRC",
        };
        f.write_str(name)
    }
}

/// Outcome of one detection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// A CRC-valid frame
    Frame(Frame),
    /// No traffic started within the idle timeout
    Idle,
    /// Traffic started but the next byte did not arrive within the gap
    Stalled { stage: FrameStage },
    /// The function code has no known layout
    Unsupported(u8),
    /// The frame was complete but its CRC did not match
    CrcMismatch { calculated: u16, received: u16 },
}

impl Detection {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Detection::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Whether bytes were consumed without producing a frame
    pub fn is_miss(&self) -> bool {
        !matches!(self, Detection::Frame(_) | Detection::Idle)
    }
}

/// Detection counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DetectorStats {
    pub frames: u64,
    pub crc_errors: u64,
    /// Frames abandoned because a byte arrived too late
    pub timeouts: u64,
    pub unsupported: u64,
    /// Idle timeouts while waiting for traffic to start
    pub idle_periods: u64,
    /// Bytes dropped while resynchronising
    pub discarded_bytes: u64,
}

/// Payload shape following the function code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadLayout {
    /// Byte count, then that many bytes (read responses)
    ByteCount,
    /// Exactly four bytes (read requests, single writes, write echoes)
    Fixed,
    /// Four bytes, byte count, then that many bytes (multiple-write requests)
    FixedThenByteCount,
}

fn payload_layout(function: FunctionCode, direction: Direction) -> Option<PayloadLayout> {
    use FunctionCode::*;

    match (function, direction) {
        (
            ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters,
            Direction::Response,
        ) => Some(PayloadLayout::ByteCount),
        (
            ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters,
            Direction::Request,
        ) => Some(PayloadLayout::Fixed),
        (WriteSingleCoil | WriteSingleRegister, _) => Some(PayloadLayout::Fixed),
        (WriteMultipleCoils | WriteMultipleRegisters, Direction::Response) => {
            Some(PayloadLayout::Fixed)
        },
        (WriteMultipleCoils | WriteMultipleRegisters, Direction::Request) => {
            Some(PayloadLayout::FixedThenByteCount)
        },
        (Unsupported(_), _) => None,
    }
}

/// Timing-based Modbus RTU frame detector
#[derive(Debug)]
pub struct FrameDetector<S> {
    source: S,
    max_inter_byte_gap: Duration,
    frame_gap: Duration,
    last_byte_at: Instant,
    stats: DetectorStats,
}

impl<S: ByteSource> FrameDetector<S> {
    /// Create a detector with gaps derived from the source's baud rate
    pub fn new(source: S) -> Self {
        let baud_rate = source.baud_rate();
        let gap = inter_byte_gap_for(baud_rate);
        if baud_rate <= MAX_BAUD_RATE_FOR_DERIVED_GAP {
            debug!(
                "Baud rate (<= {}): {}, max time between bytes {} us",
                MAX_BAUD_RATE_FOR_DERIVED_GAP,
                baud_rate,
                gap.as_micros()
            );
        } else {
            debug!(
                "Baud rate (> {}): {}, max time between bytes {} us",
                MAX_BAUD_RATE_FOR_DERIVED_GAP,
                baud_rate,
                gap.as_micros()
            );
        }
        Self::with_gap(source, gap)
    }

    /// Create a detector with an explicit inter-byte gap
    ///
    /// Useful behind USB serial adapters that deliver bytes in bursts spaced
    /// by their latency timer rather than by the line rate.
    pub fn with_gap(source: S, max_inter_byte_gap: Duration) -> Self {
        let frame_gap = frame_gap_for(source.baud_rate()).max(max_inter_byte_gap);
        Self {
            source,
            max_inter_byte_gap,
            frame_gap,
            last_byte_at: Instant::now(),
            stats: DetectorStats::default(),
        }
    }

    pub fn max_inter_byte_gap(&self) -> Duration {
        self.max_inter_byte_gap
    }

    pub fn frame_gap(&self) -> Duration {
        self.frame_gap
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Detect one frame, or `None` on timeout, CRC failure or unsupported code
    ///
    /// `Err` is reserved for failures of the byte source itself.
    pub async fn detect_frame(
        &mut self,
        direction: Direction,
        idle_timeout: Duration,
    ) -> Result<Option<Frame>> {
        Ok(self.detect(direction, idle_timeout).await?.into_frame())
    }

    /// Detect one frame, reporting why nothing was produced
    pub async fn detect(
        &mut self,
        direction: Direction,
        idle_timeout: Duration,
    ) -> Result<Detection> {
        if !self.wait_for_traffic(idle_timeout).await? {
            self.stats.idle_periods += 1;
            return Ok(Detection::Idle);
        }
        self.last_byte_at = Instant::now();

        let mut raw = Vec::with_capacity(MAX_RTU_FRAME_LEN);

        if !self.read_bytes(&mut raw, RTU_HEADER_LEN).await? {
            let stage = if raw.is_empty() {
                FrameStage::Address
            } else {
                FrameStage::Function
            };
            return Ok(self.stalled(stage));
        }

        let address = raw[0];
        let function = raw[1];
        let code = FunctionCode::from(function);

        let Some(layout) = payload_layout(code, direction) else {
            debug!("Unsupported function {:02X} from slave {}", function, address);
            self.stats.unsupported += 1;
            return Ok(Detection::Unsupported(function));
        };

        if matches!(layout, PayloadLayout::Fixed | PayloadLayout::FixedThenByteCount)
            && !self.read_bytes(&mut raw, FIXED_PAYLOAD_LEN).await?
        {
            return Ok(self.stalled(FrameStage::Data));
        }

        if matches!(
            layout,
            PayloadLayout::ByteCount | PayloadLayout::FixedThenByteCount
        ) {
            let Some(byte_count) = self.read_next_byte().await? else {
                return Ok(self.stalled(FrameStage::ByteCount));
            };
            raw.push(byte_count);
            if !self.read_bytes(&mut raw, usize::from(byte_count)).await? {
                return Ok(self.stalled(FrameStage::Data));
            }
        }

        let mut trailer = Vec::with_capacity(RTU_CRC_LEN);
        if !self.read_bytes(&mut trailer, RTU_CRC_LEN).await? {
            return Ok(self.stalled(FrameStage::Crc));
        }

        let calculated = crc16(&raw);
        let received = u16::from_le_bytes([trailer[0], trailer[1]]);
        if calculated != received {
            debug!(
                "CRC mismatch: calculated 0x{:04X}, received 0x{:04X}",
                calculated, received
            );
            self.stats.crc_errors += 1;
            return Ok(Detection::CrcMismatch {
                calculated,
                received,
            });
        }

        let payload = raw.split_off(RTU_HEADER_LEN);
        let frame = Frame::new(address, function, payload);
        debug!("RTU {} detected: {}", direction, frame);
        self.stats.frames += 1;
        Ok(Detection::Frame(frame))
    }

    /// Drop bytes until the bus has been silent for one frame gap
    ///
    /// Called after a miss so the next detection starts at a frame boundary
    /// instead of in the tail of the rejected frame. Returns the number of
    /// bytes dropped.
    pub async fn skip_to_silence(&mut self) -> Result<usize> {
        let mut discarded = 0usize;
        loop {
            while self.source.try_read_byte().is_some() {
                discarded += 1;
            }
            match timeout(self.frame_gap, self.source.wait_readable()).await {
                Ok(result) => result?,
                Err(_) => break,
            }
        }

        if discarded > 0 {
            debug!("Resync: discarded {}B", discarded);
            self.stats.discarded_bytes += discarded as u64;
        }
        Ok(discarded)
    }

    fn stalled(&mut self, stage: FrameStage) -> Detection {
        debug!("Failed to read {}: inter-byte timeout", stage);
        self.stats.timeouts += 1;
        Detection::Stalled { stage }
    }

    /// Wait for any traffic, bounded by the bus-idle timeout
    async fn wait_for_traffic(&mut self, idle_timeout: Duration) -> Result<bool> {
        if self.source.bytes_available() > 0 {
            return Ok(true);
        }
        match timeout(idle_timeout, self.source.wait_readable()).await {
            Ok(result) => {
                result?;
                Ok(true)
            },
            Err(_) => Ok(false),
        }
    }

    /// Append `count` bytes to `buf`; `false` if the gap expired first
    async fn read_bytes(&mut self, buf: &mut Vec<u8>, count: usize) -> Result<bool> {
        for _ in 0..count {
            match self.read_next_byte().await? {
                Some(byte) => buf.push(byte),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Next byte of the current frame, gated by the inter-byte gap
    async fn read_next_byte(&mut self) -> Result<Option<u8>> {
        if self.source.bytes_available() == 0 {
            let deadline = self.last_byte_at + self.max_inter_byte_gap;
            match timeout_at(deadline, self.source.wait_readable()).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            }
        }

        let byte = self.source.try_read_byte();
        if byte.is_some() {
            self.last_byte_at = Instant::now();
        }
        Ok(byte)
    }
}
