use colored::Colorize;

use crate::util::common_options::ProbeOptions;
use crate::util::logging;
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    probe_options: ProbeOptions,
}

impl Cmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut proxy = self.probe_options.open(config)?;

        if !proxy.read_status()?.cpu_halted() {
            logging::println(format!("{} CPU is already running", "Note:".cyan().bold()));
            return Ok(());
        }

        let status = proxy.exit()?;
        if status.cpu_halted() {
            anyhow::bail!("The CPU is still halted after leaving debug mode");
        }

        logging::println(format!("      {} CPU running", "Resumed".green().bold()));
        Ok(())
    }
}
