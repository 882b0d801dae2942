use super::logging;

use std::sync::Arc;
use std::time::{Duration, Instant};

use cclib::flashing::{FlashError, FlashProgress, ProgressEvent, WriteOptions};
use cclib::image::MemoryImage;
use cclib::{ChipDriver, DebugProbeError};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;

/// Bytes read from the chip per progress step.
const READ_CHUNK: usize = 0x1000;

/// Progress bars of one kind of operation, one bar per block.
pub struct ProgressBarGroup {
    message: String,
    bars: Vec<ProgressBar>,
    selected: Option<usize>,
}

impl ProgressBarGroup {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            bars: vec![],
            selected: None,
        }
    }

    fn active() -> ProgressStyle {
        ProgressStyle::with_template("{msg:.green.bold} {spinner} {percent:>3}% [{bar:20}] {bytes:>10} @ {bytes_per_sec:>12} (ETA {eta})")
            .expect("Error in progress bar creation. This is a bug, please report it.")
            .tick_chars("⠁⠁⠉⠙⠚⠒⠂⠂⠒⠲⠴⠤⠄⠄⠤⠠⠠⠤⠦⠖⠒⠐⠐⠒⠓⠋⠉⠈⠈✔")
            .progress_chars("##-")
    }

    fn finished() -> ProgressStyle {
        ProgressStyle::with_template("{msg:.green.bold} {spinner} {percent:>3}% [{bar:20}] {bytes:>10} @ {bytes_per_sec:>12} (took {elapsed})")
            .expect("Error in progress bar creation. This is a bug, please report it.")
            .tick_chars("⠁⠁⠉⠙⠚⠒⠂⠂⠒⠲⠴⠤⠄⠄⠤⠠⠠⠤⠦⠖⠒⠐⠐⠒⠓⠋⠉⠈⠈✔")
            .progress_chars("##")
    }

    /// Starts a new bar and makes it the one that receives updates.
    pub fn add(&mut self, bar: ProgressBar, address: u32) {
        bar.set_message(format!("{} {:#07x}", self.message, address));
        bar.set_style(Self::active());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.reset_elapsed();

        self.selected = Some(self.bars.len());
        self.bars.push(bar);
    }

    fn current(&self) -> Option<&ProgressBar> {
        self.selected.and_then(|selected| self.bars.get(selected))
    }

    pub fn inc(&mut self, size: u64) {
        if let Some(bar) = self.current() {
            bar.inc(size);
        }
    }

    pub fn abandon(&mut self) {
        if let Some(bar) = self.current() {
            bar.abandon();
        }
        self.selected = None;
    }

    pub fn finish(&mut self) {
        if let Some(bar) = self.current() {
            bar.set_style(Self::finished());
            bar.finish();
        }
        self.selected = None;
    }
}

pub struct CliProgressBars {
    multi_progress: MultiProgress,
    group: Mutex<ProgressBarGroup>,
}

impl CliProgressBars {
    pub fn new(message: &str) -> Self {
        let multi_progress = MultiProgress::new();
        logging::set_progress_bar(multi_progress.clone());

        Self {
            multi_progress,
            group: Mutex::new(ProgressBarGroup::new(message)),
        }
    }

    pub fn handle(&self, event: ProgressEvent) {
        let mut group = self.group.lock();
        match event {
            ProgressEvent::Started { address, total } => {
                let bar = self.multi_progress.add(ProgressBar::new(total as u64));
                group.add(bar, address);
            }
            ProgressEvent::ChunkProgrammed { size, .. } => group.inc(size as u64),
            ProgressEvent::VerifyRetry { address, attempt } => {
                logging::eprintln(format!(
                    "     {} verification failed at {:#07x}, retry {}",
                    "Warning".yellow().bold(),
                    address,
                    attempt
                ));
            }
            ProgressEvent::Failed => group.abandon(),
            ProgressEvent::Finished => group.finish(),
        }
    }
}

impl Drop for CliProgressBars {
    fn drop(&mut self) {
        // If we don't do this, the progress bars disappear.
        logging::clear_progress_bar();
    }
}

/// Fails if any block of `image` lies beyond the flash.
pub fn check_fits(image: &MemoryImage, flash_size: u32) -> Result<(), FlashError> {
    let Some(first) = image.blocks().first() else {
        return Ok(());
    };

    let top = image.top();
    if top > u64::from(flash_size) {
        return Err(FlashError::ImageTooLarge {
            start: first.address(),
            end: u32::try_from(top).unwrap_or(u32::MAX),
            flash_size,
        });
    }
    Ok(())
}

/// Lists the blocks of an image the way they will be written.
pub fn print_sections(image: &MemoryImage) {
    for block in image.blocks() {
        logging::println(format!(
            "     {} {:#07x}..{:#07x} ({} bytes)",
            "Section".cyan().bold(),
            block.address(),
            block.end(),
            block.len()
        ));
    }
}

/// Writes every block of `image`, drawing a progress bar per block unless disabled.
pub fn write_image(
    driver: &mut dyn ChipDriver,
    image: &MemoryImage,
    options: WriteOptions<'_>,
    disable_progressbars: bool,
) -> Result<(), FlashError> {
    let bars = (!disable_progressbars).then(|| Arc::new(CliProgressBars::new("  Programming")));

    let handler = bars.clone();
    let progress = FlashProgress::new(move |event| {
        tracing::trace!(?event, "flash progress");
        if let Some(bars) = &handler {
            bars.handle(event);
        }
    });

    let options = WriteOptions {
        progress: Some(&progress),
        ..options
    };

    let flash_timer = Instant::now();

    // A running DMA transfer would interfere with the flash channels.
    driver.pause_dma(false)?;
    for block in image.blocks() {
        driver.write_code(block.address(), block.data(), &options)?;
    }

    drop(progress);
    drop(bars);

    logging::eprintln(format!(
        "     {} in {:.02}s",
        "Finished".green().bold(),
        flash_timer.elapsed().as_secs_f32(),
    ));

    Ok(())
}

/// Reads the whole flash into one block at address 0.
pub fn read_flash(
    driver: &mut dyn ChipDriver,
    disable_progressbars: bool,
) -> Result<MemoryImage, DebugProbeError> {
    let flash_size = driver.flash_size() as usize;
    let bars = (!disable_progressbars).then(|| CliProgressBars::new("Reading flash"));
    if let Some(bars) = &bars {
        bars.handle(ProgressEvent::Started {
            address: 0,
            total: flash_size,
        });
    }

    let mut image = MemoryImage::new();
    let mut offset = 0;
    while offset < flash_size {
        let size = READ_CHUNK.min(flash_size - offset);
        let chunk = match driver.read_code(offset as u32, size) {
            Ok(chunk) => chunk,
            Err(error) => {
                if let Some(bars) = &bars {
                    bars.handle(ProgressEvent::Failed);
                }
                return Err(error);
            }
        };
        image.stack(&chunk);

        if let Some(bars) = &bars {
            bars.handle(ProgressEvent::ChunkProgrammed {
                address: offset as u32,
                size,
            });
        }
        offset += size;
    }

    if let Some(bars) = &bars {
        bars.handle(ProgressEvent::Finished);
    }
    Ok(image)
}

#[cfg(test)]
mod test {
    use super::*;
    use cclib::chip::AttachOptions;
    use cclib::probe::fake_probe::{FakeAdapter, FakeChip};
    use pretty_assertions::assert_eq;

    fn attached(chip: FakeChip) -> (FakeAdapter, Box<dyn ChipDriver>) {
        let adapter = FakeAdapter::new(chip);
        let options = AttachOptions {
            enter_debug: true,
            ..Default::default()
        };
        let driver = cclib::attach(adapter.proxy(), &options).unwrap();
        (adapter, driver)
    }

    #[test]
    fn image_above_flash_does_not_fit() {
        let mut image = MemoryImage::new();
        image.set(0x7FF0, &[0; 0x20]);

        let error = check_fits(&image, 0x8000).unwrap_err();

        assert!(matches!(
            error,
            FlashError::ImageTooLarge {
                start: 0x7FF0,
                end: 0x8010,
                flash_size: 0x8000
            }
        ));
        assert!(check_fits(&image, 0x10000).is_ok());
        assert!(check_fits(&MemoryImage::new(), 0).is_ok());
    }

    #[test]
    fn writes_all_blocks() {
        let (adapter, mut driver) = attached(FakeChip::cc2541());
        let mut image = MemoryImage::new();
        image.set(0x0000, &[0x02, 0x01, 0x00]);
        image.set(0x2000, &[0xAA; 0x30]);

        write_image(driver.as_mut(), &image, WriteOptions::default(), true).unwrap();

        adapter.with(|chip| {
            assert_eq!(&chip.flash()[..3], &[0x02, 0x01, 0x00]);
            assert_eq!(&chip.flash()[0x2000..0x2030], &[0xAA; 0x30]);
        });
    }

    #[test]
    fn reads_the_whole_flash() {
        let (adapter, mut driver) = attached(FakeChip::cc2510());
        adapter.with(|chip| chip.flash_mut()[0x1234] = 0x42);

        let image = read_flash(driver.as_mut(), true).unwrap();

        assert_eq!(image.block_count(), 1);
        assert_eq!(image.top(), u64::from(driver.flash_size()));
        assert_eq!(image.get(0x1234, 1), Some(&[0x42][..]));
    }
}
