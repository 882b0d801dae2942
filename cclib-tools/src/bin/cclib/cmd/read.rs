use std::path::PathBuf;

use cclib::image::{self, Format};
use colored::Colorize;

use crate::util::common_options::ProbeOptions;
use crate::util::{flash, logging};
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    probe_options: ProbeOptions,

    /// File to store the flash contents in
    output: PathBuf,

    /// Output format, guessed from the file extension if missing
    #[clap(long)]
    format: Option<Format>,

    #[clap(long)]
    disable_progressbars: bool,
}

impl Cmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut driver = self.probe_options.attach(config)?;

        logging::println(format!(
            "      {} {} KiB of flash from {}",
            "Reading".green().bold(),
            driver.flash_size() / 1024,
            driver.name()
        ));

        let image = flash::read_flash(driver.as_mut(), self.disable_progressbars)?;
        image::save(&image, &self.output, self.format)?;

        logging::println(format!(
            "        {} {}",
            "Saved".green().bold(),
            self.output.display()
        ));
        Ok(())
    }
}
