use std::path::PathBuf;

use anyhow::Context;
use cclib::flashing::{FlashStrategy, WriteOptions};
use cclib::image::{self, Format};
use colored::Colorize;

use crate::util::common_options::ProbeOptions;
use crate::util::{cli, flash, logging, parse_u32};
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    probe_options: ProbeOptions,

    /// The image to write
    input: PathBuf,

    /// Input format, guessed from the file extension if missing
    #[clap(long)]
    format: Option<Format>,

    /// Move the whole image up by this many bytes
    #[clap(long, value_parser = parse_u32, default_value = "0")]
    offset: u32,

    /// Erase the whole chip before writing
    #[clap(long)]
    erase: bool,

    /// Do not read back written chunks
    #[clap(long)]
    no_verify: bool,

    /// How often a chunk failing verification is written again
    #[clap(long, default_value_t = 3)]
    verify_retries: u32,

    /// How data gets into flash: `dma` or `routine` (CC2510 only)
    #[clap(long, default_value = "dma")]
    strategy: FlashStrategy,

    /// Do not ask for confirmation
    #[clap(long, short)]
    yes: bool,

    #[clap(long)]
    disable_progressbars: bool,
}

impl Cmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut image = image::load(&self.input, self.format)
            .with_context(|| format!("Failed to load {}", self.input.display()))?;
        image.offset_by(self.offset)?;

        let mut driver = self.probe_options.attach(config)?;

        logging::println(format!(
            "     {} {} ({} blocks)",
            "Loading".green().bold(),
            self.input.display(),
            image.block_count()
        ));
        flash::print_sections(&image);
        flash::check_fits(&image, driver.flash_size())?;

        let question = if self.erase {
            format!("This will erase the {} and write the image. Continue?", driver.name())
        } else {
            format!("This will write the image to the {}. Continue?", driver.name())
        };
        cli::confirm(&question, self.yes)?;

        if self.erase {
            logging::println(format!("      {} chip", "Erasing".green().bold()));
            driver.proxy_mut().chip_erase()?;
        }

        let options = WriteOptions {
            verify: config.verify && !self.no_verify,
            verify_retries: self.verify_retries,
            strategy: self.strategy,
            ..WriteOptions::default()
        };
        flash::write_image(driver.as_mut(), &image, options, self.disable_progressbars)?;

        Ok(())
    }
}
