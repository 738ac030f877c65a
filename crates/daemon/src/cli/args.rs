pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "caims")]
#[command(about = "Confidential inference: broker, workload server and client")]
pub struct Args {
    /// Path to the caims config directory (defaults to ~/.caims)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
