//! Driver for the CC2510 family.
//!
//! These chips need their own instruction table and do not map flash into
//! XDATA. CODE is read with `MOVC` instead.

use super::registers::{sfr, CODE_BANK_SIZE};
use super::{ChipDriver, ChipFamily, ChipProfile, CC2510_TABLE};
use crate::probe::commands::opcodes;
use crate::probe::{CcProxy, DebugProbeError};
use crate::Error;

const CHIP_ID: u8 = 0x81;

const FLASH_SIZE: u32 = 16 * 1024;
const SRAM_SIZE: u32 = 2 * 1024;
const PAGE_SIZE: u32 = 0x400;
const FLASH_WORD_SIZE: u32 = 2;

pub(super) fn is_cc2510(chip_id: u16) -> bool {
    chip_id.to_be_bytes()[0] == CHIP_ID
}

#[derive(Debug)]
pub struct Cc2510 {
    proxy: CcProxy,
    profile: ChipProfile,
}

impl Cc2510 {
    /// Loads the CC251x instruction table. The geometry is fixed for the family.
    pub fn new(mut proxy: CcProxy, table_version: Option<u8>) -> Result<Self, Error> {
        CC2510_TABLE.negotiate(&mut proxy, table_version)?;

        let profile = ChipProfile {
            name: "CC251x",
            family: ChipFamily::Cc2510,
            chip_id: proxy.chip_id(),
            flash_size: FLASH_SIZE,
            sram_size: SRAM_SIZE,
            flash_page_size: PAGE_SIZE,
            bulk_block_size: PAGE_SIZE,
            usb: false,
            flash_word_size: FLASH_WORD_SIZE,
            erase_page_shift: 1,
            software_routine: true,
            instruction_table: CC2510_TABLE,
        };

        Ok(Self { proxy, profile })
    }
}

impl ChipDriver for Cc2510 {
    fn proxy(&self) -> &CcProxy {
        &self.proxy
    }

    fn proxy_mut(&mut self) -> &mut CcProxy {
        &mut self.proxy
    }

    fn profile(&self) -> &ChipProfile {
        &self.profile
    }

    /// Writes `MEMCTR = bank * 16 + 1`.
    fn select_xdata_bank(&mut self, bank: u8) -> Result<(), DebugProbeError> {
        self.set_register(sfr::MEMCTR, bank.wrapping_mul(16).wrapping_add(1))?;
        Ok(())
    }

    /// Reads CODE with `CLR A; MOVC A,@A+DPTR; INC DPTR` per byte.
    fn read_code(&mut self, offset: u32, size: usize) -> Result<Vec<u8>, DebugProbeError> {
        let bank = offset / CODE_BANK_SIZE;
        self.select_xdata_bank(bank as u8)?;

        let relative = (offset - bank * CODE_BANK_SIZE) as u16;
        let proxy = self.proxy_mut();
        proxy.instri(opcodes::MOV_DPTR_IMM, relative)?;

        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            proxy.instr(&[opcodes::CLR_A])?;
            data.push(proxy.instr(&[opcodes::MOVC_A_DPTR])?);
            proxy.instr(&[opcodes::INC_DPTR])?;
        }

        Ok(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chip::{attach, AttachOptions};
    use crate::probe::fake_probe::{FakeAdapter, FakeChip};
    use pretty_assertions::assert_eq;

    fn attached() -> (FakeAdapter, Box<dyn ChipDriver>) {
        let adapter = FakeAdapter::new(FakeChip::cc2510());
        let options = AttachOptions {
            enter_debug: true,
            ..Default::default()
        };
        let driver = attach(adapter.proxy(), &options).unwrap();
        (adapter, driver)
    }

    #[test]
    fn fixed_profile_and_table_v2() {
        let (adapter, driver) = attached();
        let profile = driver.profile();

        assert_eq!(profile.name, "CC251x");
        assert_eq!(profile.flash_size, 16 * 1024);
        assert_eq!(profile.sram_size, 2 * 1024);
        assert_eq!(profile.flash_page_size, 0x400);
        assert_eq!(profile.flash_word_size, 2);
        assert_eq!(adapter.with(|chip| chip.instruction_table()[0]), 2);
    }

    #[test]
    fn memctr_is_written_directly() {
        let (adapter, mut driver) = attached();

        driver.select_xdata_bank(0).unwrap();

        assert_eq!(adapter.with(|chip| chip.sfr(sfr::MEMCTR)), 0x01);
    }

    #[test]
    fn code_is_read_with_movc() {
        let (adapter, mut driver) = attached();
        adapter.with(|chip| chip.flash_mut()[0x0123..0x0126].copy_from_slice(&[7, 8, 9]));

        assert_eq!(driver.read_code(0x0123, 3).unwrap(), vec![7, 8, 9]);
    }
}
