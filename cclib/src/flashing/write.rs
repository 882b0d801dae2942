use super::dma::{self, DmaDescriptor};
use super::{controller, routine, FlashError, FlashStrategy, WriteOptions};
use crate::chip::{ChipDriver, ChipProfile};
use crate::probe::POLL_INTERVAL;

/// Flash address units of FADDRH:FADDRL on the DMA path.
const FLASH_WORD: u32 = 4;

/// Writes `data` to flash starting at `offset`.
///
/// The chip must be in debug mode. The DMA strategy additionally needs DMA
/// to be unpaused. Any abort or verification failure stops the write; the
/// remaining chunks are not touched.
#[tracing::instrument(skip(driver, data, options), fields(len = data.len()))]
pub fn write_code<D: ChipDriver + ?Sized>(
    driver: &mut D,
    offset: u32,
    data: &[u8],
    options: &WriteOptions<'_>,
) -> Result<(), FlashError> {
    check_fits(driver.profile(), offset, data.len())?;

    if let Some(progress) = options.progress {
        progress.started(offset, data.len());
    }

    let result = match options.strategy {
        FlashStrategy::Dma => write_with_dma(driver, offset, data, options),
        FlashStrategy::Routine => routine::write_with_routine(driver, offset, data, options),
    };

    if let Some(progress) = options.progress {
        match result {
            Ok(()) => progress.finished(),
            Err(_) => progress.failed(),
        }
    }

    result
}

fn check_fits(profile: &ChipProfile, offset: u32, len: usize) -> Result<(), FlashError> {
    let end = u64::from(offset) + len as u64;
    if end > u64::from(profile.flash_size) {
        return Err(FlashError::ImageTooLarge {
            start: offset,
            end: end.min(u64::from(u32::MAX)) as u32,
            flash_size: profile.flash_size,
        });
    }
    Ok(())
}

fn configure_channels<D: ChipDriver + ?Sized>(
    driver: &mut D,
    len: usize,
) -> Result<(), FlashError> {
    let len = len as u16;
    dma::configure_channel(driver, 0, &DmaDescriptor::burst_to_ram(len))?;
    dma::configure_channel(driver, 1, &DmaDescriptor::ram_to_flash(len))?;
    Ok(())
}

fn write_with_dma<D: ChipDriver + ?Sized>(
    driver: &mut D,
    offset: u32,
    data: &[u8],
    options: &WriteOptions<'_>,
) -> Result<(), FlashError> {
    let (bulk, page_size) = {
        let profile = driver.profile();
        (profile.bulk_block_size, profile.flash_page_size)
    };

    // The controller programs whole words, pad both ends with 0xFF.
    let start = offset - offset % FLASH_WORD;
    let end = offset + data.len() as u32;
    let mut words = vec![0xFF; (offset - start) as usize];
    words.extend_from_slice(data);
    words.resize(words.len().next_multiple_of(FLASH_WORD as usize), 0xFF);

    let mut configured = bulk as usize;
    configure_channels(driver, configured)?;

    controller::clear_status(driver)?;
    dma::clear_irq(driver, 0)?;
    dma::clear_irq(driver, 1)?;
    dma::disarm_channel(driver, 0)?;
    dma::disarm_channel(driver, 1)?;

    let mut erased_page = None;
    let mut address = start;
    for chunk in block_chunks(&words, start, bulk) {
        let from = offset.max(address);
        let to = end.min(address + chunk.len() as u32);
        let expected = &data[(from - offset) as usize..(to - offset) as usize];

        if chunk.len() != configured {
            configured = chunk.len();
            configure_channels(driver, configured)?;
        }

        // A page shared by two chunks is only erased for the first one.
        let page = address / page_size;
        let erase = options.erase && erased_page != Some(page);
        if erase {
            erased_page = Some(page);
        }

        let chunk_address = address;
        program_verified(driver, from, expected, options, |driver| {
            program_chunk(driver, chunk_address, chunk, erase)
        })?;

        address += chunk.len() as u32;
    }

    Ok(())
}

/// Splits `words` starting at flash address `start` into chunks that never
/// cross a multiple of `bulk`.
fn block_chunks(words: &[u8], start: u32, bulk: u32) -> impl Iterator<Item = &[u8]> {
    let mut rest = words;
    let mut address = start;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let room = (bulk - address % bulk) as usize;
        let (chunk, tail) = rest.split_at(room.min(rest.len()));
        rest = tail;
        address += chunk.len() as u32;
        Some(chunk)
    })
}

/// One pass of the DMA algorithm for a single chunk.
fn program_chunk<D: ChipDriver + ?Sized>(
    driver: &mut D,
    address: u32,
    chunk: &[u8],
    erase: bool,
) -> Result<(), FlashError> {
    let (page_size, erase_shift) = {
        let profile = driver.profile();
        (profile.flash_page_size, profile.erase_page_shift)
    };

    // Host to RAM.
    dma::arm_channel(driver, 0)?;
    driver.proxy_mut().burst_write(chunk)?;
    while !dma::is_irq(driver, 0)? {
        std::thread::sleep(POLL_INTERVAL);
    }
    dma::clear_irq(driver, 0)?;

    let page = address / page_size;
    let word = (address / FLASH_WORD) as u16;

    if erase {
        controller::erase_page(driver, page, erase_shift)?;
    }
    controller::set_word_offset(driver, word)?;

    // RAM to flash.
    dma::arm_channel(driver, 1)?;
    controller::start_write(driver)?;
    while !dma::is_irq(driver, 1)? {
        if controller::is_aborted(driver)? {
            dma::disarm_channel(driver, 1)?;
            return Err(FlashError::PageLocked { page });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    dma::clear_irq(driver, 1)?;

    tracing::trace!("Programmed {} bytes at {:#07x}", chunk.len(), address);
    Ok(())
}

/// Runs `program` and, if requested, reads `expected` back from `address`.
///
/// A mismatch runs `program` again, at most `verify_retries` times.
pub(super) fn program_verified<D: ChipDriver + ?Sized>(
    driver: &mut D,
    address: u32,
    expected: &[u8],
    options: &WriteOptions<'_>,
    mut program: impl FnMut(&mut D) -> Result<(), FlashError>,
) -> Result<(), FlashError> {
    let mut retries = 0;

    loop {
        program(driver)?;

        if !options.verify {
            break;
        }

        let Some(mismatch) = first_mismatch(driver, address, expected)? else {
            break;
        };

        if retries >= options.verify_retries {
            return Err(FlashError::Verification {
                address: mismatch,
                attempts: retries + 1,
            });
        }

        retries += 1;
        tracing::warn!(
            "Flash error at {:#07x}, will retry ({}/{})",
            mismatch,
            retries,
            options.verify_retries
        );
        if let Some(progress) = options.progress {
            progress.verify_retry(address, retries);
        }
    }

    if let Some(progress) = options.progress {
        progress.chunk_programmed(address, expected.len());
    }

    Ok(())
}

fn first_mismatch<D: ChipDriver + ?Sized>(
    driver: &mut D,
    address: u32,
    expected: &[u8],
) -> Result<Option<u32>, FlashError> {
    let actual = driver.read_code(address, expected.len())?;

    Ok(actual
        .iter()
        .zip(expected)
        .position(|(actual, expected)| actual != expected)
        .map(|index| address + index as u32))
}
