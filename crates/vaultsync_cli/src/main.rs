//! VaultSync CLI
//!
//! Command-line tools for VaultSync keys, sealed blobs and local stores.
//!
//! # Commands
//!
//! - `keygen` - Generate or derive a record key
//! - `key convert` - Re-encode a key file
//! - `seal` - Seal a record JSON file into a blob
//! - `open` - Open a sealed blob and print the record
//! - `inspect` - Display local store statistics

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// VaultSync command-line tools.
#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key, or derive one from a passphrase
    Keygen {
        /// Print the key as a PEM block
        #[arg(long)]
        pem: bool,

        /// Derive from this passphrase instead of generating randomly
        #[arg(long, requires = "salt")]
        passphrase: Option<String>,

        /// Salt for passphrase derivation
        #[arg(long, requires = "passphrase")]
        salt: Option<String>,
    },

    /// Key file utilities
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Seal a record JSON file into an encrypted blob
    Seal {
        /// Key text or path to a key file
        #[arg(short, long)]
        key: String,

        /// Record JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Output blob file
        #[arg(short, long)]
        output: PathBuf,

        /// Write the JSON envelope instead of raw bytes
        #[arg(short, long)]
        envelope: bool,
    },

    /// Open a sealed blob and print the record as JSON
    Open {
        /// Key text or path to a key file
        #[arg(short, long)]
        key: String,

        /// Blob file
        #[arg(short, long)]
        input: PathBuf,

        /// Read the input as a JSON envelope
        #[arg(short, long)]
        envelope: bool,
    },

    /// Display local store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Re-encode a key file
    Convert {
        /// Key file in either format
        file: PathBuf,

        /// Target format
        #[arg(long, value_enum)]
        to: KeyFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyFormat {
    /// PEM block
    Pem,
    /// `key_<hex>`
    Prefixed,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen {
            pem,
            passphrase,
            salt,
        } => {
            let secret = passphrase.zip(salt);
            println!("{}", commands::keygen::run(pem, secret)?.trim_end());
        }
        Commands::Key {
            command: KeyCommands::Convert { file, to },
        } => {
            let text = commands::key::convert(&file, matches!(to, KeyFormat::Pem))?;
            println!("{}", text.trim_end());
        }
        Commands::Seal {
            key,
            input,
            output,
            envelope,
        } => {
            commands::seal::run(&key, &input, &output, envelope)?;
        }
        Commands::Open {
            key,
            input,
            envelope,
        } => {
            commands::open::run(&key, &input, envelope)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Version => {
            println!("VaultSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Envelope format v{}", vaultsync_codec::ENVELOPE_VERSION);
        }
    }

    Ok(())
}
