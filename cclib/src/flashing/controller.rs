//! Access to the flash controller through its XDATA mapped registers.

use crate::chip::registers::xdata;
use crate::chip::ChipDriver;
use crate::probe::{DebugProbeError, POLL_INTERVAL};

/// Bits of the FCTL register.
pub mod fctl {
    pub const BUSY: u8 = 0x80;
    pub const FULL: u8 = 0x40;
    pub const ABORT: u8 = 0x20;
    pub const WRITE: u8 = 0x02;
    pub const ERASE: u8 = 0x01;
    /// Writing FCTL masked with this clears the status flags.
    pub const STATUS_MASK: u8 = 0x1F;
}

fn read_fctl<D: ChipDriver + ?Sized>(driver: &mut D) -> Result<u8, DebugProbeError> {
    Ok(driver.read_xdata(xdata::FCTL, 1)?[0])
}

fn update_fctl<D: ChipDriver + ?Sized>(
    driver: &mut D,
    update: impl FnOnce(u8) -> u8,
) -> Result<(), DebugProbeError> {
    let value = update(read_fctl(driver)?);
    driver.write_xdata(xdata::FCTL, &[value])?;
    Ok(())
}

/// Programs FADDRH:FADDRL with a word address (4 bytes per word).
pub fn set_word_offset<D: ChipDriver + ?Sized>(
    driver: &mut D,
    word: u16,
) -> Result<(), DebugProbeError> {
    driver.write_xdata(xdata::FADDRL, &word.to_le_bytes())?;
    Ok(())
}

pub fn is_full<D: ChipDriver + ?Sized>(driver: &mut D) -> Result<bool, DebugProbeError> {
    Ok(read_fctl(driver)? & fctl::FULL != 0)
}

pub fn is_busy<D: ChipDriver + ?Sized>(driver: &mut D) -> Result<bool, DebugProbeError> {
    Ok(read_fctl(driver)? & fctl::BUSY != 0)
}

pub fn is_aborted<D: ChipDriver + ?Sized>(driver: &mut D) -> Result<bool, DebugProbeError> {
    Ok(read_fctl(driver)? & fctl::ABORT != 0)
}

pub fn clear_status<D: ChipDriver + ?Sized>(driver: &mut D) -> Result<(), DebugProbeError> {
    update_fctl(driver, |value| value & fctl::STATUS_MASK)
}

pub fn start_write<D: ChipDriver + ?Sized>(driver: &mut D) -> Result<(), DebugProbeError> {
    update_fctl(driver, |value| value | fctl::WRITE)
}

pub fn start_erase<D: ChipDriver + ?Sized>(driver: &mut D) -> Result<(), DebugProbeError> {
    update_fctl(driver, |value| value | fctl::ERASE)
}

/// Erases one page and waits until the controller is idle again.
///
/// The page number goes into FADDRH shifted by the family specific
/// `shift`, FADDRL is cleared.
pub fn erase_page<D: ChipDriver + ?Sized>(
    driver: &mut D,
    page: u32,
    shift: u8,
) -> Result<(), DebugProbeError> {
    let high = (page << shift) as u8;
    driver.write_xdata(xdata::FADDRL, &[0, high])?;
    start_erase(driver)?;

    while is_busy(driver)? {
        std::thread::sleep(POLL_INTERVAL);
    }

    tracing::debug!("Erased flash page {:#04x}", page);
    Ok(())
}
