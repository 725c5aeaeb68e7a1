//! Raptor register protocol
//!
//! The camera's serial control channel carries short binary frames, each
//! terminated by an XOR checksum over the preceding bytes. Registers are one
//! byte wide; wider values are written as a sequence of independent
//! single-byte "page" writes at consecutive register addresses.
//!
//! ## Frames
//!
//! ```text
//! write page    53 E0 02 <addr> <value> 50 <csum>   ack: 50 <csum>
//! set address   53 E0 01 <addr> 50 <csum>
//! read trigger  53 E1 01 50 E3                       reply: <value> ...
//! ```
//!
//! Responses are collected until the link goes quiet for one read timeout
//! (or an expected byte count has arrived) and are reported as
//! space-separated lowercase hex, which is also how frames are logged.
//!
//! No exchange is retried here; callers retry by calling again.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use super::checksum::{append_checksum, compute_checksum};
use super::registers::Register;
use super::transport::SerialLink;

/// Device-select byte that opens every register frame.
pub const DEVICE_SELECT: u8 = 0x53;
/// Register write / set-address command.
pub const CMD_WRITE: u8 = 0xE0;
/// Register read command.
pub const CMD_READ: u8 = 0xE1;
/// End-of-transmission marker; also the first byte of every acknowledgement.
pub const ETX: u8 = 0x50;

/// `53 E1 01 50 E3`
pub const READ_TRIGGER: [u8; 5] = [DEVICE_SELECT, CMD_READ, 0x01, ETX, 0xE3];

/// Default per-read serial timeout.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 64;

/// Errors that can occur during a register exchange.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Low-level I/O error on the serial link.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nothing came back for the request within the serial timeout.
    #[error("Timeout waiting for response to [{request}]")]
    Timeout { request: String },

    /// The device answered, but not with the expected acknowledgement.
    #[error("Unexpected response: expected [{expected}], received [{received}]")]
    UnexpectedResponse { expected: String, received: String },

    /// Response too short or otherwise unusable.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Text that is not a space-separated list of hex bytes.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// A physical value that cannot be represented in the register.
    #[error("{register} value {value} out of range")]
    ValueOutOfRange { register: &'static str, value: f64 },
}

/// Result type for register protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Render bytes the way the camera log shows them: `"53 e0 02"`.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse whitespace-separated hex byte text.
pub fn decode_hex(text: &str) -> ProtocolResult<Vec<u8>> {
    text.split_whitespace()
        .map(|token| {
            if token.len() > 2 {
                return Err(ProtocolError::InvalidHex(token.to_string()));
            }
            u8::from_str_radix(token, 16).map_err(|_| ProtocolError::InvalidHex(token.to_string()))
        })
        .collect()
}

/// `53 E0 02 <addr> <value> 50 <csum>`
pub fn write_page_frame(address: u8, value: u8) -> Vec<u8> {
    append_checksum(&[DEVICE_SELECT, CMD_WRITE, 0x02, address, value, ETX])
}

/// `53 E0 01 <addr> 50 <csum>`
pub fn set_address_frame(address: u8) -> Vec<u8> {
    append_checksum(&[DEVICE_SELECT, CMD_WRITE, 0x01, address, ETX])
}

/// The acknowledgement a frame should draw: `50 <frame checksum>`.
pub fn expected_ack(frame: &[u8]) -> [u8; 2] {
    let payload = frame.split_last().map(|(_, p)| p).unwrap_or(&[]);
    [ETX, compute_checksum(payload)]
}

/// Synchronous request/response channel to the camera controller.
pub struct RegisterProtocol<L: SerialLink> {
    link: L,
}

impl<L: SerialLink> RegisterProtocol<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Send one frame and collect whatever comes back.
    ///
    /// Reading stops once `expected_len` bytes have arrived, or when a read
    /// times out with nothing new. An empty response is returned as empty
    /// text; use [`transact`](Self::transact) to treat it as a timeout.
    pub fn exchange(&mut self, frame: &[u8], expected_len: Option<usize>) -> ProtocolResult<String> {
        let request = encode_hex(frame);
        debug!("raptor send: {request}");

        self.link.discard_input()?;
        self.link.write_frame(frame)?;

        let mut received = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.link.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            if expected_len.is_some_and(|len| received.len() >= len) {
                break;
            }
        }

        let response = encode_hex(&received);
        trace!("raptor recv: [{response}]");
        Ok(response)
    }

    /// Like [`exchange`](Self::exchange), but an empty response is a timeout.
    pub fn transact(&mut self, frame: &[u8], expected_len: Option<usize>) -> ProtocolResult<String> {
        let response = self.exchange(frame, expected_len)?;
        if response.is_empty() {
            return Err(ProtocolError::Timeout {
                request: encode_hex(frame),
            });
        }
        Ok(response)
    }

    /// Send a frame and require the response to be exactly `expected`.
    pub fn expect(&mut self, frame: &[u8], expected: &[u8]) -> ProtocolResult<()> {
        let received = self.transact(frame, Some(expected.len()))?;
        let expected = encode_hex(expected);
        if received != expected {
            return Err(ProtocolError::UnexpectedResponse { expected, received });
        }
        Ok(())
    }

    /// Write a single register page and check its acknowledgement.
    pub fn write_page(&mut self, address: u8, value: u8) -> ProtocolResult<()> {
        let frame = write_page_frame(address, value);
        let ack = expected_ack(&frame);
        self.expect(&frame, &ack)
    }

    /// Write `value` across the register's pages, most significant byte first.
    pub fn write_register(&mut self, register: &Register, value: u32) -> ProtocolResult<()> {
        let width = register.width();
        if width < 4 && value >> (8 * width) != 0 {
            return Err(ProtocolError::ValueOutOfRange {
                register: register.name,
                value: f64::from(value),
            });
        }
        for (i, &address) in register.addresses.iter().enumerate() {
            let shift = 8 * (width - 1 - i);
            self.write_page(address, (value >> shift) as u8)?;
        }
        Ok(())
    }

    /// Read one register address and return the raw hex response.
    pub fn read_register(&mut self, address: u8) -> ProtocolResult<String> {
        self.exchange(&set_address_frame(address), None)?;
        self.transact(&READ_TRIGGER, None)
    }

    /// Read one register address and return its value (the first response byte).
    pub fn read_byte(&mut self, address: u8) -> ProtocolResult<u8> {
        let response = self.read_register(address)?;
        decode_hex(&response)?
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::MalformedResponse(format!("register 0x{address:02x}")))
    }

    /// Read every page of `register` and combine them, most significant first.
    pub fn read_register_value(&mut self, register: &Register) -> ProtocolResult<u32> {
        let mut value = 0u32;
        for &address in register.addresses {
            value = (value << 8) | u32::from(self.read_byte(address)?);
        }
        Ok(value)
    }
}
