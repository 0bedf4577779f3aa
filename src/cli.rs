use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// botdeploy - provision a host and run a Python bot as a systemd service
#[derive(Parser, Debug)]
#[command(name = "botdeploy")]
#[command(about = "Deploy a Python bot to a remote host over SSH and SFTP")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: log every remote step without executing it.
    ///
    /// Local work (reading the configuration, walking the source tree)
    /// still happens so the output matches a real run.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full deployment pipeline
    Deploy {
        /// Path to the deployment configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Run independent stages one after another instead of concurrently
        #[arg(long)]
        sequential: bool,
    },
    /// Print every stage with its needs and remote script
    Plan {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Write the secrets file and both unit files to a local directory
    Render {
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Fill in real secret values from the environment instead of placeholders
        #[arg(long)]
        reveal: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Write an example configuration file
    Init {
        /// Destination path
        config: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
