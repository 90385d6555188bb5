use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scouter")]
#[command(version)]
#[command(about = "Network diagnostics service with a receipt-based API", long_about = None)]
pub struct Args {
    /// INI configuration file with a [Scouter] section
    #[arg(short, long, env = "SCOUTER_CONFIG", default_value = "config.cfg")]
    pub config: PathBuf,

    /// Listen address, overriding `listen` from the config file
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
