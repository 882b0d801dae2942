//! Page writes by a routine running on the chip itself.
//!
//! The page payload is copied to XDATA 0xF000, followed by a short program
//! that feeds it word by word into the flash controller and ends in a
//! breakpoint. The CPU is started at the program and the host waits for it to
//! halt again.

use super::write::program_verified;
use super::{FlashError, WriteOptions};
use crate::chip::registers::{sfr, xdata};
use crate::chip::ChipDriver;
use crate::probe::commands::opcodes;
use crate::probe::POLL_INTERVAL;

/// Polls of the halted flag before the routine counts as hung, ~2 s.
const HALT_POLLS: u32 = 200;

/// `MEMCTR` value set before the routine runs.
const ROUTINE_MEMCTR: u8 = 0x51;

/// Assembles the page write routine for the page starting at `address`.
pub fn flash_routine(address: u32, page_size: u32, word_size: u32, erase: bool) -> Vec<u8> {
    let words_per_page = page_size / word_size;
    let faddrh = (((address >> 8) / word_size) & 0x7E) as u8;

    let mut routine = vec![
        opcodes::MOV_DIRECT_IMM, sfr::FADDRH, faddrh, // MOV FADDRH, #imm
        opcodes::MOV_DIRECT_IMM, sfr::FADDRL, 0x00,   // MOV FADDRL, #00
    ];

    if erase {
        routine.extend_from_slice(&[
            opcodes::MOV_DIRECT_IMM, sfr::FLC, 0x01, // MOV FLC, #01H ; ERASE
            opcodes::MOV_A_DIRECT, sfr::FLC,         // eraseWait: MOV A, FLC
            0x20, 0xE7, 0xFB,                        // JB ACC_BUSY, eraseWait
        ]);
    }

    let [xdata_high, xdata_low] = xdata::ROUTINE_STAGING.to_be_bytes();
    routine.extend_from_slice(&[
        opcodes::MOV_DPTR_IMM, xdata_high, xdata_low, // MOV DPTR, #0F000H
        0x7F, (words_per_page >> 8) as u8,            // MOV R7, #imm
        0x7E, (words_per_page & 0xFF) as u8,          // MOV R6, #imm
        opcodes::MOV_DIRECT_IMM, sfr::FLC, 0x02,      // MOV FLC, #02H ; WRITE
        0x7D, word_size as u8,                        // writeLoop: MOV R5, #imm
        opcodes::MOVX_A_DPTR,                         // writeWord: MOVX A, @DPTR
        opcodes::INC_DPTR,                            // INC DPTR
        0xF5, sfr::FWDATA,                            // MOV FWDATA, A
        0xDD, 0xFA,                                   // DJNZ R5, writeWord
        opcodes::MOV_A_DIRECT, sfr::FLC,              // writeWait: MOV A, FLC
        0x20, 0xE6, 0xFB,                             // JB ACC_SWBSY, writeWait
        0xDE, 0xF1,                                   // DJNZ R6, writeLoop
        0xDF, 0xEF,                                   // DJNZ R7, writeLoop
        0xA5,                                         // breakpoint
    ]);

    routine
}

/// Writes one full page with the routine and waits for it to finish.
pub fn write_page<D: ChipDriver + ?Sized>(
    driver: &mut D,
    address: u32,
    page: &[u8],
    erase: bool,
) -> Result<(), FlashError> {
    let (page_size, word_size) = {
        let profile = driver.profile();
        (profile.flash_page_size, profile.flash_word_size)
    };
    if page.len() != page_size as usize {
        return Err(FlashError::DataTooLarge {
            size: page.len(),
            page_size: page_size as usize,
        });
    }

    let routine = flash_routine(address, page_size, word_size, erase);
    let entry = xdata::ROUTINE_STAGING + page_size as u16;

    driver.proxy_mut().halt()?;
    driver.write_xdata(xdata::ROUTINE_STAGING, page)?;
    driver.write_xdata(entry, &routine)?;
    driver.set_register(sfr::MEMCTR, ROUTINE_MEMCTR)?;
    driver.set_pc(entry)?;
    driver.proxy_mut().resume()?;

    tracing::debug!("Page write routine running for {:#07x}", address);

    for _ in 0..HALT_POLLS {
        if driver.proxy_mut().read_status()?.cpu_halted() {
            driver.proxy_mut().halt()?;
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Err(FlashError::RoutineTimeout)
}

/// Writes `data` page by page. Partial pages are padded with 0xFF, which
/// leaves the existing flash contents untouched unless the page is erased.
pub(super) fn write_with_routine<D: ChipDriver + ?Sized>(
    driver: &mut D,
    offset: u32,
    data: &[u8],
    options: &WriteOptions<'_>,
) -> Result<(), FlashError> {
    let profile = driver.profile();
    if !profile.software_routine {
        return Err(FlashError::StrategyNotSupported {
            family: profile.name,
        });
    }

    let page_size = profile.flash_page_size;
    let end = offset + data.len() as u32;
    let mut page_start = offset - offset % page_size;

    while page_start < end {
        let from = offset.max(page_start);
        let to = end.min(page_start + page_size);
        let expected = &data[(from - offset) as usize..(to - offset) as usize];

        let mut page = vec![0xFF; page_size as usize];
        let lead = (from - page_start) as usize;
        page[lead..lead + expected.len()].copy_from_slice(expected);

        program_verified(driver, from, expected, options, |driver| {
            write_page(driver, page_start, &page, options.erase)
        })?;

        page_start += page_size;
    }

    Ok(())
}
