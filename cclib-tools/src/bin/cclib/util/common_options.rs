use cclib::chip::{attach, AttachOptions, ChipDriver, ChipFamily};
use cclib::probe::{list, CcProxy, DebugProbeError, SerialConfig};

use crate::Config;

/// Options to find the adapter and attach to the chip behind it.
#[derive(clap::Parser, Debug, Clone, Default)]
pub struct ProbeOptions {
    /// Serial port of the CCLib proxy. Detected when missing.
    #[clap(long, short, env = "CC_SERIAL", help_heading = "PROBE CONFIGURATION")]
    pub port: Option<String>,
    /// Baud rate of the serial port.
    #[clap(long, help_heading = "PROBE CONFIGURATION")]
    pub baud_rate: Option<u32>,
    /// Enter debug mode if not debugging already.
    #[clap(long, short = 'E', help_heading = "PROBE CONFIGURATION")]
    pub enter: bool,
    /// Use the driver of this chip family instead of the one matching the chip ID.
    #[clap(long, help_heading = "PROBE CONFIGURATION")]
    pub family: Option<ChipFamily>,
}

impl ProbeOptions {
    /// Command line values win over the configuration.
    pub fn serial_config(&self, config: &Config) -> SerialConfig {
        SerialConfig {
            baud_rate: self.baud_rate.unwrap_or(config.baud_rate),
            ..SerialConfig::default()
        }
    }

    pub fn port<'a>(&'a self, config: &'a Config) -> Option<&'a str> {
        self.port.as_deref().or(config.port.as_deref())
    }

    /// Opens the adapter without identifying the chip.
    pub fn open(&self, config: &Config) -> Result<CcProxy, DebugProbeError> {
        list::open(self.port(config), &self.serial_config(config))
    }

    pub fn attach(&self, config: &Config) -> Result<Box<dyn ChipDriver>, cclib::Error> {
        let proxy = self.open(config)?;
        tracing::debug!("Using CCLib proxy on {}", proxy.port_name());

        attach(
            proxy,
            &AttachOptions {
                enter_debug: self.enter,
                family: self.family,
            },
        )
    }
}
