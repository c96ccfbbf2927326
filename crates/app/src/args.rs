pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Encrypt content locators under on-chain access policies")]
pub struct Args {
    /// Path to the warden config directory (defaults to ~/.warden)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: crate::Command,
}
