use std::fmt::Write as _;

use cclib::{ChipDriver, DebugProbeError};
use colored::Colorize;

use crate::util::common_options::ProbeOptions;
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    probe_options: ProbeOptions,
}

impl Cmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut driver = self.probe_options.attach(config)?;

        println!("{}", "Chip information".green().bold());
        print!("{}", render(driver.as_mut())?);
        Ok(())
    }
}

/// Renders what is known about the chip and the debug interface.
pub(crate) fn render(driver: &mut dyn ChipDriver) -> Result<String, DebugProbeError> {
    let serial = driver.serial()?;
    let info = driver.chip_info()?;
    let pc = driver.proxy_mut().read_pc()?;
    let status = driver.proxy_mut().read_status()?;
    let debug_config = driver.proxy_mut().read_config()?;
    let profile = driver.profile();

    let mut out = String::new();
    let _ = writeln!(out, "    Chip model : {}", profile.name);
    let _ = writeln!(out, "       Chip ID : {:#06x}", profile.chip_id);
    let _ = writeln!(out, "  IEEE address : {serial}");
    let _ = writeln!(out, "    Flash size : {} KiB", info.flash_kib);
    let _ = writeln!(out, "     Page size : {} B", profile.flash_page_size);
    let _ = writeln!(out, "     SRAM size : {} KiB", info.sram_kib);
    let _ = writeln!(out, "           USB : {}", if info.usb { "Yes" } else { "No" });
    let _ = writeln!(out, "            PC : {pc:#06x}");

    let _ = writeln!(out, "Debug status:");
    for (name, set) in status.flags() {
        let _ = writeln!(out, "  [{}] {name}", if set { 'X' } else { ' ' });
    }
    let _ = writeln!(out, "Debug config:");
    for (name, set) in debug_config.flags() {
        let _ = writeln!(out, "  [{}] {name}", if set { 'X' } else { ' ' });
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use cclib::chip::AttachOptions;
    use cclib::probe::fake_probe::{FakeAdapter, FakeChip};

    #[test]
    fn shows_chip_and_flags() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        let options = AttachOptions {
            enter_debug: true,
            ..Default::default()
        };
        let mut driver = cclib::attach(adapter.proxy(), &options).unwrap();

        let text = render(driver.as_mut()).unwrap();

        assert!(text.contains("Chip model : CC2541"));
        assert!(text.contains("Chip ID : 0x4103"));
        assert!(text.contains("IEEE address : bc9a78563412"));
        assert!(text.contains("Flash size : 256 KiB"));
        assert!(text.contains("SRAM size : 8 KiB"));
        assert!(text.contains("USB : No"));
    }
}
