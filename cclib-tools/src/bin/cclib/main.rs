mod cmd;
mod util;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use figment::providers::{Env, Format as _, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::util::cli::exit_code;
use crate::util::logging::{setup_logging, LevelFilter};

/// Name of the optional configuration file in the working directory.
const CONFIG_FILE: &str = "cclib.toml";

/// Settings shared by all subcommands, read from [`CONFIG_FILE`] and
/// `CCLIB_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Serial port used when `--port` is not given.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Read back written flash unless `--no-verify` is given.
    pub verify: bool,
    pub log_level: Option<LevelFilter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: cclib::probe::SerialConfig::default().baud_rate,
            verify: true,
            log_level: None,
        }
    }
}

#[derive(clap::Parser)]
#[clap(
    name = "cclib",
    about = "Read, write and inspect TI CC25xx chips through a CCLib proxy",
    version
)]
struct Cli {
    /// Location for a JSON log file
    #[clap(long, global = true, help_heading = "LOG CONFIGURATION")]
    log_file: Option<PathBuf>,
    /// Log level for messages on the terminal. Falls back to `RUST_LOG`.
    #[clap(long, global = true, value_enum, help_heading = "LOG CONFIGURATION")]
    log_level: Option<LevelFilter>,
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// Show information about the connected chip
    Info(cmd::info::Cmd),
    /// Dump the whole flash into a file
    Read(cmd::read::Cmd),
    /// Write an image into flash
    Write(cmd::write::Cmd),
    /// Leave debug mode and let the CPU run
    Resume(cmd::resume::Cmd),
    /// Show the BlueGiga license and Bluetooth address of a CC2540/CC2541
    BleInfo(cmd::ble_info::Cmd),
    /// Write a BlueGiga firmware, keeping license, address and persistent store
    BleWrite(cmd::ble_write::Cmd),
}

fn load_config(dir: &Path) -> Result<Config> {
    let config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(dir.join(CONFIG_FILE)))
        .merge(Env::prefixed("CCLIB_"))
        .extract::<Config>()?;

    Ok(config)
}

fn run(cli: Cli, config: &Config) -> Result<()> {
    match cli.subcommand {
        Subcommand::Info(cmd) => cmd.run(config),
        Subcommand::Read(cmd) => cmd.run(config),
        Subcommand::Write(cmd) => cmd.run(config),
        Subcommand::Resume(cmd) => cmd.run(config),
        Subcommand::BleInfo(cmd) => cmd.run(config),
        Subcommand::BleWrite(cmd) => cmd.run(config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(Path::new(".")) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{} {error:?}", "Error:".red().bold());
            return ExitCode::from(5);
        }
    };

    let log_file = cli.log_file.clone();
    let _logger_guard = match setup_logging(log_file.as_deref(), cli.log_level.or(config.log_level))
    {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("{} {error:?}", "Error:".red().bold());
            return ExitCode::from(1);
        }
    };

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            util::logging::clear_progress_bar();
            util::logging::eprintln(format!("{} {error:?}", "Error:".red().bold()));
            ExitCode::from(exit_code(&error))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_without_a_file() {
        let dir = tempfile::tempdir().unwrap();

        let config = load_config(dir.path()).unwrap();

        assert_eq!(config.baud_rate, 115200);
        assert!(config.verify);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "port = \"/dev/ttyACM3\"\nbaud_rate = 57600\nverify = false\nlog_level = \"DEBUG\"\n",
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();

        assert_eq!(
            config,
            Config {
                port: Some("/dev/ttyACM3".into()),
                baud_rate: 57600,
                verify: false,
                log_level: Some(LevelFilter::Debug),
            }
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "speed = 1\n").unwrap();

        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn command_line_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
