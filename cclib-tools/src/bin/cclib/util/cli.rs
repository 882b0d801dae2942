use std::io::Write;

use cclib::flashing::FlashError;
use cclib::image::ImageError;
use cclib::vendor::bluegiga::BleInfoError;
use cclib::{chip::ChipError, DebugProbeError, ErrorClass};

/// The user declined a confirmation prompt.
#[derive(Debug, thiserror::Error)]
#[error("Aborted by the user")]
pub struct Aborted;

/// Asks a yes/no question on the terminal, anything but `y` aborts.
pub fn confirm(question: &str, assume_yes: bool) -> anyhow::Result<()> {
    if assume_yes {
        return Ok(());
    }

    print!("{question} <y/N>: ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;

    match answer.trim() {
        "y" | "Y" => Ok(()),
        _ => Err(Aborted.into()),
    }
}

/// Maps an error to the exit status of the process.
///
/// 1 for adapter, protocol and I/O errors, 2 if the user aborted, 3 for
/// failed flash operations, 4 for images that do not fit and unsupported
/// chips, 5 for invalid files and values.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if cause.is::<Aborted>() {
            return 2;
        }

        let class = if let Some(error) = cause.downcast_ref::<cclib::Error>() {
            if let cclib::Error::Flash(FlashError::ImageTooLarge { .. }) = error {
                return 4;
            }
            error.class()
        } else if let Some(error) = cause.downcast_ref::<FlashError>() {
            if let FlashError::ImageTooLarge { .. } = error {
                return 4;
            }
            error.class()
        } else if let Some(error) = cause.downcast_ref::<DebugProbeError>() {
            error.class()
        } else if let Some(error) = cause.downcast_ref::<ImageError>() {
            error.class()
        } else if cause.is::<ChipError>() {
            ErrorClass::ChipCompatibility
        } else if cause.is::<BleInfoError>() {
            ErrorClass::Format
        } else {
            continue;
        };

        return match class {
            ErrorClass::Protocol | ErrorClass::Adapter | ErrorClass::Io => 1,
            ErrorClass::FlashOperation => 3,
            ErrorClass::ChipCompatibility => 4,
            ErrorClass::Format => 5,
        };
    }

    1
}
