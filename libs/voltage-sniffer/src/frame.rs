//! Modbus RTU frame and register observation types

use std::fmt;

// ============================================================================
// Function Code
// ============================================================================

/// Function codes recognised on the wire
///
/// Anything else is carried as `Unsupported` so every dispatch site has to
/// handle it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// FC01
    ReadCoils,
    /// FC02
    ReadDiscreteInputs,
    /// FC03
    ReadHoldingRegisters,
    /// FC04
    ReadInputRegisters,
    /// FC05
    WriteSingleCoil,
    /// FC06
    WriteSingleRegister,
    /// FC15
    WriteMultipleCoils,
    /// FC16
    WriteMultipleRegisters,
    /// Any other code, including exception responses (bit 7 set)
    Unsupported(u8),
}

impl FunctionCode {
    /// Raw function code byte
    pub fn code(&self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
            FunctionCode::WriteSingleCoil => 0x05,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::WriteMultipleCoils => 0x0F,
            FunctionCode::WriteMultipleRegisters => 0x10,
            FunctionCode::Unsupported(code) => *code,
        }
    }

    /// FC01-04: the response carries a byte count
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    /// Codes the splitter turns into register observations
    pub fn is_decodable(&self) -> bool {
        matches!(
            self,
            FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleRegisters
        )
    }
}

impl From<u8> for FunctionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => FunctionCode::ReadCoils,
            0x02 => FunctionCode::ReadDiscreteInputs,
            0x03 => FunctionCode::ReadHoldingRegisters,
            0x04 => FunctionCode::ReadInputRegisters,
            0x05 => FunctionCode::WriteSingleCoil,
            0x06 => FunctionCode::WriteSingleRegister,
            0x0F => FunctionCode::WriteMultipleCoils,
            0x10 => FunctionCode::WriteMultipleRegisters,
            other => FunctionCode::Unsupported(other),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02}", self.code())
    }
}

// ============================================================================
// Direction
// ============================================================================

/// Which half of a master/slave exchange the detector is waiting for
///
/// Requests and responses share a function code but not a layout: a read
/// request carries start/quantity, its response carries a byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Response => write!(f, "response"),
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A CRC-validated Modbus RTU frame
///
/// Only the detector creates frames, after the CRC check passed. The payload
/// excludes the address, function code and CRC; for read responses its first
/// byte is the byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    address: u8,
    function: u8,
    payload: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(address: u8, function: u8, payload: Vec<u8>) -> Self {
        Self {
            address,
            function,
            payload,
        }
    }

    /// Slave/unit address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Raw function code byte
    pub fn function(&self) -> u8 {
        self.function
    }

    pub fn function_code(&self) -> FunctionCode {
        FunctionCode::from(self.function)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Big-endian u16 at `offset` in the payload
    pub(crate) fn be_u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.payload.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slave={} {} payload={}B",
            self.address,
            self.function_code(),
            self.payload.len()
        )
    }
}

// ============================================================================
// Register Observation
// ============================================================================

/// One decoded register fact
///
/// `address` is the protocol (0-based) register address as carried on the
/// wire; `value` is the register content read or the value written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModbusData {
    pub address: u16,
    pub value: u16,
}

impl ModbusData {
    pub fn new(address: u16, value: u16) -> Self {
        Self { address, value }
    }

    /// State of one bit of the register value (bit 0 is the LSB)
    pub fn bit(&self, bit: u8) -> Option<bool> {
        if bit > crate::constants::MAX_REGISTER_BIT {
            return None;
        }
        Some(self.value & (1 << bit) != 0)
    }
}
