use crate::chip::ChipError;
use crate::flashing::FlashError;
use crate::image::ImageError;
use crate::probe::DebugProbeError;
use crate::vendor::bluegiga::BleInfoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("An error with the usage of the probe occured")]
    Probe(#[from] DebugProbeError),
    #[error("The connected chip cannot be used")]
    Chip(#[from] ChipError),
    #[error("A flash operation failed")]
    Flash(#[from] FlashError),
    #[error("The memory image is invalid")]
    Image(#[from] ImageError),
    #[error("The BLE info page is invalid")]
    BleInfo(#[from] BleInfoError),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Broad categories of [`Error`], each reported with its own exit status
/// by the command line tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed or short responses, unknown status bytes.
    Protocol,
    /// The adapter reported an error, or none could be found.
    Adapter,
    /// Unknown chip, or the wrong chip for an operation.
    ChipCompatibility,
    /// Verification, aborted writes and images that do not fit.
    FlashOperation,
    /// Invalid files or user supplied values.
    Format,
    Io,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Probe(error) => error.class(),
            Error::Chip(_) => ErrorClass::ChipCompatibility,
            Error::Flash(error) => error.class(),
            Error::Image(error) => error.class(),
            Error::BleInfo(_) => ErrorClass::Format,
            Error::Io(_) => ErrorClass::Io,
        }
    }
}

impl DebugProbeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DebugProbeError::Io(_) | DebugProbeError::CouldNotOpen { .. } => ErrorClass::Io,
            DebugProbeError::Adapter(_)
            | DebugProbeError::NotFound(_)
            | DebugProbeError::NoAdapterFound => ErrorClass::Adapter,
            _ => ErrorClass::Protocol,
        }
    }
}

impl FlashError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FlashError::Probe(error) => error.class(),
            FlashError::StrategyNotSupported { .. } => ErrorClass::ChipCompatibility,
            _ => ErrorClass::FlashOperation,
        }
    }
}

impl ImageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ImageError::Io(_) => ErrorClass::Io,
            _ => ErrorClass::Format,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::AdapterError;
    use test_case::test_case;

    #[test_case(DebugProbeError::UnknownStatus(0x07).into(), ErrorClass::Protocol)]
    #[test_case(DebugProbeError::Adapter(AdapterError::ChipNotResponding).into(), ErrorClass::Adapter)]
    #[test_case(ChipError::Unsupported(0x1234).into(), ErrorClass::ChipCompatibility)]
    #[test_case(FlashError::PageLocked { page: 3 }.into(), ErrorClass::FlashOperation)]
    #[test_case(FlashError::Probe(DebugProbeError::NoAdapterFound).into(), ErrorClass::Adapter)]
    #[test_case(BleInfoError::InvalidLicense("00".into()).into(), ErrorClass::Format)]
    #[test_case(ImageError::UnknownRecordType { line: 1, record_type: 6 }.into(), ErrorClass::Format)]
    fn classes(error: Error, expected: ErrorClass) {
        assert_eq!(error.class(), expected);
    }
}
