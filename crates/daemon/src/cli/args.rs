pub use clap::Parser;

use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "shroud")]
#[command(about = "Share files as encrypted, self-expiring links over Tor")]
pub struct Args {
    /// Address of a running daemon (defaults to the configured local port)
    #[arg(long, global = true)]
    pub remote: Option<Url>,

    /// Path to the shroud state directory (defaults to ~/.shroud)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
