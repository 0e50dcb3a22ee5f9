use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shareconv")]
#[command(about = "Convert videos and photos into share-friendly files")]
#[command(version, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write daily rolling log files to this directory
    #[arg(long, global = true, env = "SHARECONV_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert files and report progress until every job has finished
    Convert {
        /// Source files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Config file (defaults to config.toml next to the executable)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Override the configured number of concurrent conversions
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        concurrency: Option<u16>,
    },

    /// Print a JPEG thumbnail of a file as a data URI
    Thumbnail {
        file: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Look up ffmpeg and ImageMagick on PATH
    Detect {
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Commands {
    pub fn wants_json(&self) -> bool {
        match self {
            Commands::Convert { json, .. } | Commands::Detect { json } => *json,
            _ => false,
        }
    }
}
