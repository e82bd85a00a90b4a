//! Command-line interface

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Bloby - push files and their metadata to a device over a single TCP link"
)]
pub struct Cli {
    /// Config file (defaults to $BLOBY_CONFIG or ~/.config/bloby/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level diagnostics (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one file to a listening device
    Send {
        /// Device host or IP
        host: String,
        /// File to send
        file: PathBuf,
        /// Device port
        #[arg(short, long)]
        port: Option<u16>,
        /// Extra metadata entries (key=value), repeatable
        #[arg(long = "meta", value_parser = parse_key_val, action = ArgAction::Append)]
        meta: Vec<(String, String)>,
    },

    /// Connect to a device and save every file it pushes until it disconnects
    Receive {
        /// Device host or IP
        host: String,
        /// Device port
        #[arg(short, long)]
        port: Option<u16>,
        /// Overwrite files that already exist
        #[arg(short, long)]
        force: bool,
        /// Directory to write received files into
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Use file names from the peer verbatim, even if they leave --dir
        #[arg(long)]
        no_confine: bool,
        /// Append a JSONL record of every transfer to this file
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Act as the device: listen and push files to each receiver that connects
    Serve {
        /// Files to push, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Bind address (host:port); port defaults to the configured one
        #[arg(long)]
        bind: Option<String>,
        /// Exit after serving the first receiver
        #[arg(long)]
        once: bool,
        /// Extra metadata entries (key=value), repeatable
        #[arg(long = "meta", value_parser = parse_key_val, action = ArgAction::Append)]
        meta: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    if k.is_empty() {
        return Err(format!("empty key in {:?}", s));
    }
    Ok((k.to_string(), v.to_string()))
}
