//! Request/response pair decoding
//!
//! A pair only says something about register state when the response
//! actually answers the request: same slave, same function, and a payload
//! whose shape agrees with the request's quantity. Anything else is dropped
//! without an error.

use tracing::debug;

use crate::constants::FIXED_PAYLOAD_LEN;
use crate::frame::{Frame, FunctionCode, ModbusData};

/// Number of addressable registers (0x0000..=0xFFFF)
const REGISTER_SPACE: u32 = 0x1_0000;

/// Decode a request/response pair into register observations
///
/// Returns `None` when either frame is missing, the pair does not match,
/// the function code is not decodable or the layout is inconsistent.
/// A read of zero registers yields `Some` with no observations.
pub fn split(request: Option<&Frame>, response: Option<&Frame>) -> Option<Vec<ModbusData>> {
    let (request, response) = (request?, response?);

    if request.address() != response.address() {
        debug!(
            "Pair mismatch: request slave {} vs response slave {}",
            request.address(),
            response.address()
        );
        return None;
    }
    if request.function() != response.function() {
        debug!(
            "Pair mismatch: request {} vs response {}",
            request.function_code(),
            response.function_code()
        );
        return None;
    }

    match request.function_code() {
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            split_read_registers(request, response)
        },
        FunctionCode::WriteSingleRegister => split_write_single_register(request, response),
        FunctionCode::WriteMultipleRegisters => split_write_multiple_registers(request, response),
        FunctionCode::ReadCoils
        | FunctionCode::ReadDiscreteInputs
        | FunctionCode::WriteSingleCoil
        | FunctionCode::WriteMultipleCoils
        | FunctionCode::Unsupported(_) => {
            debug!("Unsupported Modbus function: {}", request.function_code());
            None
        },
    }
}

/// Start address and quantity from the first four payload bytes
fn start_and_count(frame: &Frame) -> Option<(u16, u16)> {
    Some((frame.be_u16_at(0)?, frame.be_u16_at(2)?))
}

fn range_fits(start: u16, count: u16) -> bool {
    u32::from(start) + u32::from(count) <= REGISTER_SPACE
}

/// `count` consecutive registers from `start`, values read at `offset`
fn collect_registers(
    start: u16,
    count: u16,
    values: &Frame,
    offset: usize,
) -> Option<Vec<ModbusData>> {
    if !range_fits(start, count) {
        debug!("Register range overflow: start={} count={}", start, count);
        return None;
    }
    (0..count)
        .map(|i| {
            let value = values.be_u16_at(offset + usize::from(i) * 2)?;
            Some(ModbusData::new(start + i, value))
        })
        .collect()
}

/// FC03/FC04: request `start, count`; response `byte_count, values...`
fn split_read_registers(request: &Frame, response: &Frame) -> Option<Vec<ModbusData>> {
    if request.payload_len() != FIXED_PAYLOAD_LEN {
        debug!("Read request payload {}B, expected 4B", request.payload_len());
        return None;
    }
    let (start, count) = start_and_count(request)?;
    let value_bytes = usize::from(count) * 2;

    if response.payload_len() != value_bytes + 1 {
        debug!(
            "Read response payload {}B, expected {}B for {} registers",
            response.payload_len(),
            value_bytes + 1,
            count
        );
        return None;
    }
    let byte_count = usize::from(*response.payload().first()?);
    if byte_count != value_bytes {
        debug!("Byte count {} mismatch, expected {}", byte_count, value_bytes);
        return None;
    }

    collect_registers(start, count, response, 1)
}

/// FC06: the response echoes the request's `address, value`
fn split_write_single_register(request: &Frame, response: &Frame) -> Option<Vec<ModbusData>> {
    if request.payload_len() != FIXED_PAYLOAD_LEN || response.payload_len() != FIXED_PAYLOAD_LEN
    {
        debug!(
            "Write single payloads {}B/{}B, expected 4B/4B",
            request.payload_len(),
            response.payload_len()
        );
        return None;
    }
    if request.payload() != response.payload() {
        debug!("Write single echo differs from request");
        return None;
    }

    let (address, value) = start_and_count(request)?;
    Some(vec![ModbusData::new(address, value)])
}

/// FC16: request `start, count, byte_count, values...`; response echoes `start, count`
fn split_write_multiple_registers(request: &Frame, response: &Frame) -> Option<Vec<ModbusData>> {
    if request.payload_len() < FIXED_PAYLOAD_LEN + 1 {
        debug!("Write multiple request payload {}B too short", request.payload_len());
        return None;
    }
    let (start, count) = start_and_count(request)?;
    let byte_count = usize::from(request.payload()[FIXED_PAYLOAD_LEN]);
    let value_bytes = usize::from(count) * 2;

    if byte_count != value_bytes || request.payload_len() != FIXED_PAYLOAD_LEN + 1 + byte_count {
        debug!(
            "Write multiple layout mismatch: count={} byte_count={} payload={}B",
            count,
            byte_count,
            request.payload_len()
        );
        return None;
    }
    if response.payload() != &request.payload()[..FIXED_PAYLOAD_LEN] {
        debug!("Write multiple echo differs from request");
        return None;
    }

    collect_registers(start, count, request, FIXED_PAYLOAD_LEN + 1)
}
