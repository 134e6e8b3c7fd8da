//! Modbus RTU timing and framing constants
//!
//! Timing values follow the Modbus over serial line guide:
//! - one character is 11 bits on the wire (start + 8 data + parity/stop)
//! - above 19200 baud the guide fixes t1.5 at 750 µs and t3.5 at 1750 µs

use std::time::Duration;

// ============================================================================
// Timing Constants
// ============================================================================

/// Bits per serial character (start + 8 data + parity/stop)
pub const BITS_PER_CHARACTER: u32 = 11;

/// Highest baud rate for which the gaps are derived from the character time
pub const MAX_BAUD_RATE_FOR_DERIVED_GAP: u32 = 19_200;

/// Inter-byte gap floor used above 19200 baud (t1.5)
pub const MIN_INTER_BYTE_GAP_US: u64 = 750;

/// Inter-frame silence floor used above 19200 baud (t3.5)
pub const MIN_FRAME_GAP_US: u64 = 1_750;

/// Default bus-idle timeout while waiting for a request
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Default request-to-response timeout (covers slave processing latency)
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1_000);

// ============================================================================
// Frame Layout Constants
// ============================================================================

/// Unit address (1) + function code (1)
pub const RTU_HEADER_LEN: usize = 2;

/// CRC trailer, transmitted low byte first
pub const RTU_CRC_LEN: usize = 2;

/// Fixed payload of read requests and of single/multiple write echoes:
/// start address (2) + quantity or value (2)
pub const FIXED_PAYLOAD_LEN: usize = 4;

/// Largest RTU ADU (address + PDU + CRC)
pub const MAX_RTU_FRAME_LEN: usize = 256;

/// Highest valid bit index inside a 16-bit register
pub const MAX_REGISTER_BIT: u8 = 15;
