//! Chip family drivers.
//!
//! Every memory and register access is bootstrapped from single 8051
//! instructions executed by the halted CPU, see [`ChipDriver`]. The family
//! specific parts (bank selection, CODE reads, flash geometry) live in
//! [`cc254x`] and [`cc2510`].

pub mod cc2510;
pub mod cc254x;
mod instruction_table;
pub mod registers;

pub use cc2510::Cc2510;
pub use cc254x::Cc254x;
pub use instruction_table::{InstructionTable, CC2510_TABLE, CC254X_TABLE};

use crate::flashing::{self, FlashError, WriteOptions};
use crate::probe::commands::opcodes;
use crate::probe::{CcProxy, DebugConfig, DebugProbeError};
use crate::Error;
use registers::{sfr, xdata, CODE_BANK_SIZE};
use std::fmt;
use std::str::FromStr;

/// Errors raised while identifying the connected chip.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChipError {
    #[error("No chip found. Check your connection and/or wiring!")]
    NoChip,
    #[error("Short-circuit or wrong wiring detected. Check your connection and/or wiring!")]
    ShortCircuit,
    #[error("No driver found for your chip (chipID={0:#06x})")]
    Unsupported(u16),
    #[error("This operation requires a {expected} chip, found chip ID {chip_id:#06x}")]
    UnexpectedChip { expected: &'static str, chip_id: u16 },
}

/// The chip families a driver exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipFamily {
    /// CC2530, CC2531, CC2533, CC2540 and CC2541.
    Cc254x,
    /// CC2510 and its siblings.
    Cc2510,
}

impl ChipFamily {
    /// Picks the family from the high byte of the chip ID.
    pub fn from_chip_id(chip_id: u16) -> Option<Self> {
        if cc254x::chip_name(chip_id).is_some() {
            Some(ChipFamily::Cc254x)
        } else if cc2510::is_cc2510(chip_id) {
            Some(ChipFamily::Cc2510)
        } else {
            None
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipFamily::Cc254x => f.write_str("CC254x"),
            ChipFamily::Cc2510 => f.write_str("CC251x"),
        }
    }
}

impl FromStr for ChipFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_lowercase()[..] {
            "cc254x" | "cc253x" => Ok(Self::Cc254x),
            "cc2510" | "cc251x" => Ok(Self::Cc2510),
            _ => Err(format!("Chip family '{s}' is unknown.")),
        }
    }
}

/// Contents of the two chip information registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipInfo {
    pub flash_kib: u32,
    pub usb: bool,
    pub sram_kib: u32,
}

impl ChipInfo {
    pub fn decode(raw: [u8; 2]) -> Self {
        Self {
            flash_kib: 1 << (4 + ((raw[0] & 0x70) >> 4)),
            usb: raw[0] & 0x08 != 0,
            sram_kib: u32::from(raw[1] & 0x07) + 1,
        }
    }
}

/// Static facts about the connected chip, resolved once when attaching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipProfile {
    pub name: &'static str,
    pub family: ChipFamily,
    pub chip_id: u16,
    /// Flash size in bytes.
    pub flash_size: u32,
    /// SRAM size in bytes.
    pub sram_size: u32,
    pub flash_page_size: u32,
    /// Largest chunk moved by one DMA round.
    pub bulk_block_size: u32,
    pub usb: bool,
    /// Bytes per flash word, used by the software flash routine.
    pub flash_word_size: u32,
    /// How far the page number is shifted into FADDRH for a page erase.
    pub erase_page_shift: u8,
    /// Whether the software flash routine can program this chip.
    pub software_routine: bool,
    pub instruction_table: InstructionTable,
}

impl ChipProfile {
    pub fn flash_pages(&self) -> u32 {
        self.flash_size / self.flash_page_size
    }
}

/// Options for [`attach`].
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    /// Halt the CPU and enter debug mode before identifying the chip.
    pub enter_debug: bool,
    /// Use this driver instead of the one matching the chip ID.
    pub family: Option<ChipFamily>,
}

/// Capabilities of a connected chip.
///
/// Implementors only provide access to the session, the profile and the
/// bank selection. Everything else is built on top of those from the
/// `MOV`/`MOVX`/`INC DPTR` primitives, and may be overridden where a family
/// differs.
pub trait ChipDriver: fmt::Debug + Send {
    fn proxy(&self) -> &CcProxy;

    fn proxy_mut(&mut self) -> &mut CcProxy;

    fn profile(&self) -> &ChipProfile;

    /// Maps the given CODE bank into the XDATA window at 0x8000.
    fn select_xdata_bank(&mut self, bank: u8) -> Result<(), DebugProbeError>;

    fn name(&self) -> &'static str {
        self.profile().name
    }

    fn chip_id(&self) -> u16 {
        self.profile().chip_id
    }

    /// Flash size in bytes.
    fn flash_size(&self) -> u32 {
        self.profile().flash_size
    }

    /// Reads `size` bytes of XDATA, one `MOVX` per byte.
    fn read_xdata(&mut self, offset: u16, size: usize) -> Result<Vec<u8>, DebugProbeError> {
        let proxy = self.proxy_mut();
        proxy.instri(opcodes::MOV_DPTR_IMM, offset)?;

        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            data.push(proxy.instr(&[opcodes::MOVX_A_DPTR])?);
            proxy.instr(&[opcodes::INC_DPTR])?;
        }

        Ok(data)
    }

    /// Writes `data` to XDATA, one `MOVX` per byte.
    fn write_xdata(&mut self, offset: u16, data: &[u8]) -> Result<usize, DebugProbeError> {
        let proxy = self.proxy_mut();
        proxy.instri(opcodes::MOV_DPTR_IMM, offset)?;

        for byte in data {
            proxy.instr(&[opcodes::MOV_A_IMM, *byte])?;
            proxy.instr(&[opcodes::MOVX_DPTR_A])?;
            proxy.instr(&[opcodes::INC_DPTR])?;
        }

        Ok(data.len())
    }

    /// Reads CODE memory through the banked XDATA window.
    fn read_code(&mut self, offset: u32, size: usize) -> Result<Vec<u8>, DebugProbeError> {
        let mut data = Vec::with_capacity(size);
        let mut address = offset;

        while data.len() < size {
            let bank = address / CODE_BANK_SIZE;
            let relative = address % CODE_BANK_SIZE;
            let len = (size - data.len()).min((CODE_BANK_SIZE - relative) as usize);

            self.select_xdata_bank(bank as u8)?;
            data.extend(self.read_xdata(xdata::CODE_WINDOW + relative as u16, len)?);
            address += len as u32;
        }

        Ok(data)
    }

    /// Reads a special function register.
    fn get_register(&mut self, register: u8) -> Result<u8, DebugProbeError> {
        self.proxy_mut()
            .instr(&[opcodes::MOV_A_DIRECT, register])
    }

    /// Writes a special function register.
    fn set_register(&mut self, register: u8, value: u8) -> Result<u8, DebugProbeError> {
        self.proxy_mut()
            .instr(&[opcodes::MOV_DIRECT_IMM, register, value])
    }

    fn select_flash_bank(&mut self, bank: u8) -> Result<u8, DebugProbeError> {
        self.set_register(sfr::FMAP, bank & 0x07)
    }

    /// The factory programmed IEEE address as lowercase hex, most
    /// significant byte first.
    fn serial(&mut self) -> Result<String, DebugProbeError> {
        let bytes = self.read_xdata(xdata::IEEE_ADDRESS, 6)?;
        Ok(bytes.iter().rev().map(|b| format!("{b:02x}")).collect())
    }

    fn chip_info(&mut self) -> Result<ChipInfo, DebugProbeError> {
        let raw = self.read_xdata(xdata::CHIPINFO, 2)?;
        Ok(ChipInfo::decode([raw[0], raw[1]]))
    }

    /// The read-only information page, one flash page long.
    fn info_page(&mut self) -> Result<Vec<u8>, DebugProbeError> {
        let size = self.profile().flash_page_size as usize;
        self.read_xdata(xdata::INFO_PAGE, size)
    }

    fn last_code_page(&mut self) -> Result<Vec<u8>, DebugProbeError> {
        let profile = self.profile();
        let (start, size) = (
            profile.flash_size - profile.flash_page_size,
            profile.flash_page_size,
        );
        self.read_code(start, size as usize)
    }

    /// Erases and rewrites the last flash page.
    fn write_last_code_page(
        &mut self,
        data: &[u8],
        options: &WriteOptions<'_>,
    ) -> Result<(), FlashError> {
        let profile = self.profile();
        let page_size = profile.flash_page_size as usize;
        if data.len() > page_size {
            return Err(FlashError::DataTooLarge {
                size: data.len(),
                page_size,
            });
        }

        let start = profile.flash_size - profile.flash_page_size;
        let options = WriteOptions {
            erase: true,
            ..options.clone()
        };
        self.write_code(start, data, &options)
    }

    /// Pauses or resumes DMA transfers while the chip is in debug mode.
    fn pause_dma(&mut self, pause: bool) -> Result<DebugConfig, DebugProbeError> {
        let proxy = self.proxy_mut();
        let mut config = proxy.read_config()?;
        config.set_dma_pause(pause);
        proxy.write_config(config)?;
        Ok(proxy.debug_config())
    }

    /// Moves the program counter by executing `LJMP address`.
    fn set_pc(&mut self, address: u16) -> Result<(), DebugProbeError> {
        self.proxy_mut().instri(opcodes::LJMP, address)?;
        Ok(())
    }

    /// Writes `data` to flash at `offset`.
    ///
    /// DMA must not be paused, see [`ChipDriver::pause_dma`].
    fn write_code(
        &mut self,
        offset: u32,
        data: &[u8],
        options: &WriteOptions<'_>,
    ) -> Result<(), FlashError> {
        flashing::write_code(self, offset, data, options)
    }
}

/// Identifies the chip behind `proxy` and returns the matching driver.
///
/// The driver is selected exactly once here, from the chip ID or the family
/// override in `options`.
#[tracing::instrument(skip_all)]
pub fn attach(mut proxy: CcProxy, options: &AttachOptions) -> Result<Box<dyn ChipDriver>, Error> {
    if options.enter_debug {
        proxy.enter()?;
    }

    let table_version = proxy.probe_instruction_table_version()?;
    let chip_id = proxy.read_chip_id()?;
    proxy.read_status()?;
    proxy.read_config()?;

    match chip_id {
        0x0000 => return Err(ChipError::NoChip.into()),
        0xFFFF => return Err(ChipError::ShortCircuit.into()),
        _ => (),
    }

    let family = options
        .family
        .or_else(|| ChipFamily::from_chip_id(chip_id))
        .ok_or(ChipError::Unsupported(chip_id))?;

    let driver: Box<dyn ChipDriver> = match family {
        ChipFamily::Cc254x => Box::new(Cc254x::new(proxy, table_version)?),
        ChipFamily::Cc2510 => Box::new(Cc2510::new(proxy, table_version)?),
    };

    tracing::info!(
        "Found a {} chip on {}",
        driver.name(),
        driver.proxy().port_name()
    );

    Ok(driver)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::fake_probe::{FakeAdapter, FakeChip};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn attached(chip: FakeChip) -> (FakeAdapter, Box<dyn ChipDriver>) {
        let adapter = FakeAdapter::new(chip);
        let options = AttachOptions {
            enter_debug: true,
            ..Default::default()
        };
        let driver = attach(adapter.proxy(), &options).unwrap();
        (adapter, driver)
    }

    #[test_case([0x30, 0x02], 128, false, 3)]
    #[test_case([0x70, 0x07], 2048, false, 8)]
    #[test_case([0x48, 0x00], 256, true, 1)]
    fn chip_info_decodes(raw: [u8; 2], flash_kib: u32, usb: bool, sram_kib: u32) {
        assert_eq!(
            ChipInfo::decode(raw),
            ChipInfo {
                flash_kib,
                usb,
                sram_kib
            }
        );
    }

    #[test_case(0x0000 ; "no chip")]
    #[test_case(0xFFFF ; "short circuit")]
    #[test_case(0x1234 ; "unknown chip")]
    fn attach_rejects_unusable_chip_ids(chip_id: u16) {
        let adapter = FakeAdapter::new(FakeChip::with_chip_id(chip_id));

        let error = attach(adapter.proxy(), &AttachOptions::default()).unwrap_err();

        let expected = match chip_id {
            0x0000 => ChipError::NoChip,
            0xFFFF => ChipError::ShortCircuit,
            other => ChipError::Unsupported(other),
        };
        assert!(matches!(error, Error::Chip(e) if e == expected));
    }

    #[test_case(0x8D01, Some(ChipFamily::Cc254x))]
    #[test_case(0x4103, Some(ChipFamily::Cc254x))]
    #[test_case(0xA501, Some(ChipFamily::Cc254x))]
    #[test_case(0x8104, Some(ChipFamily::Cc2510))]
    #[test_case(0x8200, None)]
    fn family_from_chip_id(chip_id: u16, family: Option<ChipFamily>) {
        assert_eq!(ChipFamily::from_chip_id(chip_id), family);
    }

    #[test]
    fn family_parses_case_insensitive() {
        assert_eq!("CC2510".parse::<ChipFamily>(), Ok(ChipFamily::Cc2510));
        assert_eq!("cc254x".parse::<ChipFamily>(), Ok(ChipFamily::Cc254x));
        assert!("cc1110".parse::<ChipFamily>().is_err());
    }

    #[test]
    fn serial_is_rendered_most_significant_byte_first() {
        let (_, mut driver) = attached(FakeChip::cc2541());

        assert_eq!(driver.serial().unwrap(), "bc9a78563412");
    }

    #[test]
    fn xdata_write_then_read() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());

        driver.write_xdata(0x0300, &[1, 2, 3]).unwrap();

        assert_eq!(driver.read_xdata(0x0300, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(adapter.with(|chip| chip.xdata(0x0300, 3).to_vec()), vec![1, 2, 3]);
    }

    #[test]
    fn read_code_crosses_bank_boundaries() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());
        adapter.with(|chip| {
            chip.flash_mut()[0x7FFE..0x8002].copy_from_slice(&[0xA1, 0xA2, 0xB1, 0xB2]);
        });

        assert_eq!(
            driver.read_code(0x7FFE, 4).unwrap(),
            vec![0xA1, 0xA2, 0xB1, 0xB2]
        );
    }

    #[test]
    fn registers_go_through_direct_addressing() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());

        driver.set_register(sfr::DMAARM, 0x03).unwrap();
        driver.select_flash_bank(0x0D).unwrap();

        assert_eq!(driver.get_register(sfr::DMAARM).unwrap(), 0x03);
        assert_eq!(adapter.with(|chip| chip.sfr(sfr::FMAP)), 0x05);
    }

    #[test]
    fn pause_dma_toggles_only_the_dma_bit() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());

        let paused = driver.pause_dma(true).unwrap();
        assert!(paused.dma_pause());
        assert_eq!(adapter.with(|chip| chip.config()), 0x26);

        let resumed = driver.pause_dma(false).unwrap();
        assert!(!resumed.dma_pause());
        assert_eq!(adapter.with(|chip| chip.config()), 0x22);
    }

    #[test]
    fn set_pc_jumps() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());

        driver.set_pc(0x1234).unwrap();

        assert_eq!(adapter.with(|chip| chip.pc()), 0x1234);
    }

    #[test]
    fn memory_access_without_debug_mode_is_reported() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());

        let error = attach(adapter.proxy(), &AttachOptions::default()).unwrap_err();

        assert!(matches!(
            error,
            Error::Probe(DebugProbeError::Adapter(
                crate::probe::AdapterError::NotInDebugMode
            ))
        ));
    }

    #[test]
    fn last_page_is_erased_and_rewritten() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());
        adapter.with(|chip| chip.flash_mut()[0x3F800..0x40000].fill(0x00));

        driver
            .write_last_code_page(&[0x11, 0x22, 0x33, 0x44], &WriteOptions::default())
            .unwrap();

        let page = driver.last_code_page().unwrap();
        assert_eq!(page.len(), 0x800);
        assert_eq!(&page[..4], &[0x11, 0x22, 0x33, 0x44]);
        assert!(page[4..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn last_page_rejects_more_than_a_page() {
        let (_, mut driver) = attached(FakeChip::cc2510());

        let error = driver
            .write_last_code_page(&[0; 0x401], &WriteOptions::default())
            .unwrap_err();

        assert!(matches!(
            error,
            FlashError::DataTooLarge {
                size: 0x401,
                page_size: 0x400
            }
        ));
    }

    #[test]
    fn info_page_is_one_page_of_xdata() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());
        adapter.with(|chip| chip.set_xdata(xdata::INFO_PAGE, &[0xC0, 0xFF, 0xEE]));

        let page = driver.info_page().unwrap();

        assert_eq!(page.len(), 0x800);
        assert_eq!(&page[..3], &[0xC0, 0xFF, 0xEE]);
    }

    #[test]
    fn family_override_wins() {
        let adapter = FakeAdapter::new(FakeChip::with_chip_id(0x8200));
        let options = AttachOptions {
            enter_debug: true,
            family: Some(ChipFamily::Cc254x),
        };

        let driver = attach(adapter.proxy(), &options).unwrap();

        assert_eq!(driver.profile().family, ChipFamily::Cc254x);
        assert_eq!(driver.chip_id(), 0x8200);
    }
}
