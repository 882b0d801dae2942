//! Driver for the CC253x and CC2540/41 system-on-chips.

use super::registers::sfr;
use super::{ChipDriver, ChipFamily, ChipProfile, CC254X_TABLE};
use crate::probe::{CcProxy, DebugProbeError};
use crate::Error;

/// Chip names by the high byte of the chip ID (SWRU191, CHIPID register).
const CHIP_IDS: [(u8, &str); 5] = [
    (0xA5, "CC2530"),
    (0xB5, "CC2531"),
    (0x95, "CC2533"),
    (0x8D, "CC2540"),
    (0x41, "CC2541"),
];

/// The CC2533 selects erase pages with `FADDRH[6:0]`, all others with `FADDRH[7:1]`.
const CC2533_ID: u8 = 0x95;

const PAGE_SIZE: u32 = 0x800;

pub(super) fn chip_name(chip_id: u16) -> Option<&'static str> {
    let [high, _] = chip_id.to_be_bytes();
    CHIP_IDS
        .iter()
        .find(|(id, _)| *id == high)
        .map(|(_, name)| *name)
}

#[derive(Debug)]
pub struct Cc254x {
    proxy: CcProxy,
    profile: ChipProfile,
}

impl Cc254x {
    /// Loads the instruction table and reads the chip geometry.
    pub fn new(mut proxy: CcProxy, table_version: Option<u8>) -> Result<Self, Error> {
        CC254X_TABLE.negotiate(&mut proxy, table_version)?;

        let chip_id = proxy.chip_id();
        let [high, _] = chip_id.to_be_bytes();
        let profile = ChipProfile {
            name: chip_name(chip_id).unwrap_or("CC254x"),
            family: ChipFamily::Cc254x,
            chip_id,
            flash_size: 0,
            sram_size: 0,
            flash_page_size: PAGE_SIZE,
            bulk_block_size: PAGE_SIZE,
            usb: false,
            flash_word_size: 4,
            erase_page_shift: if high == CC2533_ID { 0 } else { 1 },
            software_routine: false,
            instruction_table: CC254X_TABLE,
        };

        let mut driver = Self { proxy, profile };
        let info = driver.chip_info()?;
        driver.profile.flash_size = info.flash_kib * 1024;
        driver.profile.sram_size = info.sram_kib * 1024;
        driver.profile.usb = info.usb;

        tracing::debug!("Resolved chip profile {:?}", driver.profile);
        Ok(driver)
    }
}

impl ChipDriver for Cc254x {
    fn proxy(&self) -> &CcProxy {
        &self.proxy
    }

    fn proxy_mut(&mut self) -> &mut CcProxy {
        &mut self.proxy
    }

    fn profile(&self) -> &ChipProfile {
        &self.profile
    }

    /// Read-modify-write of `MEMCTR[2:0]`.
    fn select_xdata_bank(&mut self, bank: u8) -> Result<(), DebugProbeError> {
        let memctr = self.get_register(sfr::MEMCTR)?;
        let memctr = (memctr & 0xF8) | (bank & 0x07);
        tracing::trace!("Selecting XDATA bank {}", bank);
        self.set_register(sfr::MEMCTR, memctr)?;
        Ok(())
    }
}
