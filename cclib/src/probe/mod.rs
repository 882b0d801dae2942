//! Communication with the CCLib proxy adapter.
//!
//! The adapter sits between the host and the chip, bit-banging the two-wire
//! debug interface. The host talks to it over a serial link using fixed
//! 4-byte request and 3-byte response frames, see [`commands`].

pub mod commands;
#[cfg(any(test, feature = "test"))]
pub mod fake_probe;
pub mod list;
mod proxy;
mod status;

pub use proxy::{Answer, CcProxy, SerialConfig};
pub(crate) use proxy::POLL_INTERVAL;
pub use status::{DebugConfig, DebugStatus};

use crate::probe::commands::{error_codes, Command};
use std::io::{Read, Write};

/// Byte stream the proxy frames are exchanged over.
///
/// Implemented for everything that can be read and written, most notably
/// a `Box<dyn serialport::SerialPort>`.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Transport for T {}

/// An error code reported by the adapter in an ERROR response.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterError {
    #[error("CCDebugger is not properly initialized. Check the adapter firmware.")]
    NotInitialized,
    #[error("The chip is not in debug mode. Enter debug mode first.")]
    NotInDebugMode,
    #[error("The chip is not responding. Check your connection and/or wiring.")]
    ChipNotResponding,
    #[error("CCDebugger responded with an error ({0:#04x})")]
    Unknown(u8),
}

impl AdapterError {
    /// Maps the low byte of an ERROR response to its meaning.
    pub fn from_code(code: u8) -> Self {
        match code {
            error_codes::NOT_INITIALIZED => AdapterError::NotInitialized,
            error_codes::NOT_IN_DEBUG_MODE => AdapterError::NotInDebugMode,
            error_codes::CHIP_NOT_RESPONDING => AdapterError::ChipNotResponding,
            other => AdapterError::Unknown(other),
        }
    }

    /// The raw error code on the wire.
    pub fn code(&self) -> u8 {
        match self {
            AdapterError::NotInitialized => error_codes::NOT_INITIALIZED,
            AdapterError::NotInDebugMode => error_codes::NOT_IN_DEBUG_MODE,
            AdapterError::ChipNotResponding => error_codes::CHIP_NOT_RESPONDING,
            AdapterError::Unknown(code) => *code,
        }
    }
}

/// The error type for everything that can go wrong while talking to the adapter.
#[derive(thiserror::Error, Debug)]
pub enum DebugProbeError {
    #[error("Serial communication with the adapter failed")]
    Io(#[from] std::io::Error),
    #[error("Could not open serial port {port}")]
    CouldNotOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Could not find a CCLib proxy on port {0}")]
    NotFound(String),
    #[error("Could not detect a CCLib proxy connected on any serial port")]
    NoAdapterFound,
    #[error("The adapter reported an error")]
    Adapter(#[from] AdapterError),
    #[error("CCDebugger responded with an unknown status ({0:#04x})")]
    UnknownStatus(u8),
    #[error("Unexpected response {value:#06x} to {command:?}")]
    UnexpectedResponse { command: Command, value: u16 },
    #[error("Burst writes are limited to 2048 bytes, got {0}")]
    BurstTooLarge(usize),
    #[error("Invalid size of the instruction table ({0} opcodes), it must be smaller than 16")]
    InstructionTableTooLarge(usize),
    #[error("Unable to update the instruction table, expected version {expected} but adapter reports {actual}")]
    InstructionTableMismatch { expected: u8, actual: u16 },
    #[error("Instructions are 1 to 3 bytes long, got {0}")]
    InvalidInstructionLength(usize),
}

impl DebugProbeError {
    /// Whether this error was reported by the adapter itself rather than
    /// being a framing or transport fault.
    pub fn is_adapter_error(&self) -> bool {
        matches!(self, DebugProbeError::Adapter(_))
    }
}
