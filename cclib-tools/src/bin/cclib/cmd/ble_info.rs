use cclib::vendor::bluegiga::{self, BleInfo};
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

        let info = BleInfo::read(driver.as_mut())?;
        let pstore = bluegiga::pstore_size(driver.as_mut())?;

        println!("{}", "BlueGiga information".green().bold());
        print!("{}", render(&info, pstore));
        Ok(())
    }
}

fn render(info: &BleInfo, pstore: u32) -> String {
    let license = if info.has_license() {
        info.license_hex()
    } else {
        "(none)".to_string()
    };
    let lock_bits: String = info
        .lock_bits
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();

    [
        ("License", license),
        ("HW version", format!("{:#04x}", info.hardware_version)),
        ("BLE address", info.address_string()),
        ("Lock bits", lock_bits),
        ("PStore size", format!("{pstore} bytes")),
    ]
    .iter()
    .map(|(name, value)| format!("{name:>14} : {value}\n"))
    .collect()
}
