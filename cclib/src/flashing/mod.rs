//! Flash programming.
//!
//! [`write_code`] writes a byte slice to flash in chunks of the family's bulk
//! block size. By default each chunk is streamed into RAM with a burst write
//! and copied into the flash controller by DMA. CC251x chips can instead use
//! a small machine code routine that is staged in XDATA and run on the chip.

pub mod controller;
pub mod dma;
mod error;
mod progress;
pub mod routine;
mod write;

pub use controller::fctl;
pub use error::FlashError;
pub use progress::{FlashProgress, ProgressEvent};
pub use write::write_code;

use std::str::FromStr;

/// How chunks get into flash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlashStrategy {
    /// Burst write into RAM, then DMA into the flash controller.
    #[default]
    Dma,
    /// Page writes by a routine executed on the chip.
    Routine,
}

impl FromStr for FlashStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_lowercase()[..] {
            "dma" => Ok(Self::Dma),
            "routine" => Ok(Self::Routine),
            _ => Err(format!("Flash strategy '{s}' is unknown.")),
        }
    }
}

/// Options for [`write_code`].
#[derive(Clone)]
pub struct WriteOptions<'progress> {
    /// An optional progress reporter which is used if this argument is set to `Some(...)`.
    pub progress: Option<&'progress FlashProgress>,
    /// Erase each page before it is written.
    pub erase: bool,
    /// Read back every chunk and compare it.
    pub verify: bool,
    /// How often a chunk that failed verification is written again.
    /// With 0, the first mismatch is an error.
    pub verify_retries: u32,
    pub strategy: FlashStrategy,
}

impl Default for WriteOptions<'_> {
    fn default() -> Self {
        Self {
            progress: None,
            erase: false,
            verify: true,
            verify_retries: 3,
            strategy: FlashStrategy::Dma,
        }
    }
}
