use std::path::PathBuf;

use anyhow::Context;
use cclib::flashing::WriteOptions;
use cclib::image::{self, Format, MemoryImage};
use cclib::vendor::bluegiga::{self, BleInfo, BleInfoError};
use cclib::ChipDriver;
use colored::Colorize;

use crate::util::common_options::ProbeOptions;
use crate::util::{cli, flash, logging, parse_u32, parse_u8};
use crate::Config;

/// Hardware version written together with a new license.
const DEFAULT_HARDWARE_VERSION: u8 = 0x01;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    probe_options: ProbeOptions,

    /// The BlueGiga firmware image
    input: PathBuf,

    /// Input format, guessed from the file extension if missing
    #[clap(long)]
    format: Option<Format>,

    /// License key as 64 hex characters, required if the chip has none
    #[clap(long)]
    license: Option<String>,

    /// Bluetooth address as `xx:xx:xx:xx:xx:xx`
    #[clap(long)]
    addr: Option<String>,

    /// Hardware version
    #[clap(long, value_parser = parse_u8)]
    ver: Option<u8>,

    /// Move the whole image up by this many bytes
    #[clap(long, value_parser = parse_u32, default_value = "0")]
    offset: u32,

    /// Erase the whole chip before writing
    #[clap(long)]
    erase: bool,

    /// Do not ask for confirmation
    #[clap(long, short)]
    yes: bool,

    #[clap(long)]
    disable_progressbars: bool,
}

impl Cmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut driver = self.probe_options.attach(config)?;

        let current = BleInfo::read(driver.as_mut())?;
        let serial = driver.serial()?;
        let info = resolve_info(
            current,
            &serial,
            self.license.as_deref(),
            self.addr.as_deref(),
            self.ver,
        )?;

        logging::println(format!(
            "      {} {}",
            "License".green().bold(),
            info.license_hex()
        ));
        logging::println(format!(
            "  {} {}, HW version {:#04x}",
            "BLE address".green().bold(),
            info.address_string(),
            info.hardware_version
        ));

        let mut image = image::load(&self.input, self.format)
            .with_context(|| format!("Failed to load {}", self.input.display()))?;
        image.offset_by(self.offset)?;
        info.apply(&mut image, driver.flash_size());

        flash::print_sections(&image);
        flash::check_fits(&image, driver.flash_size())?;

        cli::confirm(
            &format!("This will replace the firmware of the {}. Continue?", driver.name()),
            self.yes,
        )?;

        let pstore = backup_pstore(driver.as_mut(), &mut image)?;
        if pstore > 0 {
            logging::println(format!(
                "     {} {} bytes of persistent store",
                "Keeping".green().bold(),
                pstore
            ));
        }

        if self.erase {
            logging::println(format!("      {} chip", "Erasing".green().bold()));
            driver.proxy_mut().chip_erase()?;
        }

        let options = WriteOptions {
            verify: true,
            ..WriteOptions::default()
        };
        flash::write_image(driver.as_mut(), &image, options, self.disable_progressbars)?;

        Ok(())
    }
}

/// Decides on the info block to write.
///
/// A chip without a license needs one from the command line; its address is
/// then derived from the IEEE address. Explicit values always win.
pub(crate) fn resolve_info(
    current: BleInfo,
    serial: &str,
    license: Option<&str>,
    address: Option<&str>,
    hardware_version: Option<u8>,
) -> Result<BleInfo, BleInfoError> {
    let mut info = current;

    if !info.has_license() {
        let license = license.ok_or(BleInfoError::MissingLicense)?;
        info.license = bluegiga::parse_license(license)?;
        info.address = bluegiga::address_from_serial(serial)?;
        info.hardware_version = DEFAULT_HARDWARE_VERSION;
    } else if let Some(license) = license {
        info.license = bluegiga::parse_license(license)?;
    }

    if let Some(address) = address {
        info.address = bluegiga::parse_address(address)?;
    }
    if let Some(hardware_version) = hardware_version {
        info.hardware_version = hardware_version;
    }

    Ok(info)
}

/// Copies the persistent store from the chip into `image`, returns its size.
pub(crate) fn backup_pstore(
    driver: &mut dyn ChipDriver,
    image: &mut MemoryImage,
) -> Result<u32, cclib::Error> {
    let size = bluegiga::pstore_size(driver)?;
    if size > 0 {
        let data = driver.read_code(bluegiga::PSTORE_ADDRESS, size as usize)?;
        image.set(bluegiga::PSTORE_ADDRESS, &data);
    }
    Ok(size)
}
