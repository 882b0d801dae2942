use crate::probe::DebugProbeError;
use thiserror::Error;

/// Describes any error that happened during or in preparation for a flash operation.
#[derive(Error, Debug)]
pub enum FlashError {
    #[error(
        "The image ({start:#07x}..{end:#07x}) does not fit into the {flash_size} bytes of flash."
    )]
    ImageTooLarge {
        start: u32,
        end: u32,
        flash_size: u32,
    },

    #[error("{size} bytes do not fit into a flash page of {page_size} bytes.")]
    DataTooLarge { size: usize, page_size: usize },

    #[error("Flash page {page:#04x} is locked.")]
    PageLocked { page: u32 },

    #[error("Flash verification error at offset {address:#07x} after {attempts} attempt(s).")]
    Verification { address: u32, attempts: u32 },

    #[error("The flash write routine did not halt in time.")]
    RoutineTimeout,

    #[error("The {family} driver cannot program flash with the software routine.")]
    StrategyNotSupported { family: &'static str },

    // Group wire level problems
    #[error("Something during the interaction with the debugger went wrong")]
    Probe(#[from] DebugProbeError),
}
