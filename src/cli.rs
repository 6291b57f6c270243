use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mss-remux")]
#[command(author, version, about = "Smooth Streaming fragment remuxer")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rewrite a PIFF fragment as a standard fMP4 fragment
    Convert(ConvertArgs),

    /// Expand a manifest chunk list into a segment timeline
    Timeline(TimelineArgs),

    /// Compute the requestable window of a timeline
    Availability(AvailabilityArgs),

    /// List the boxes of a fragment
    Inspect {
        /// Fragment file
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Args)]
pub struct ConvertArgs {
    /// Input fragment
    #[arg(required = true)]
    pub input: PathBuf,

    /// Where to write the converted fragment
    #[arg(short, long)]
    pub output: PathBuf,

    /// Track id written into the fragment header
    #[arg(long, default_value = "1")]
    pub track_id: u32,

    /// Fragment start time in seconds
    #[arg(long, default_value = "0")]
    pub start: f64,

    /// Fragment duration in seconds
    #[arg(long, default_value = "0")]
    pub duration: f64,

    /// Media timescale (defaults to transcode.timescale from config)
    #[arg(long)]
    pub timescale: Option<u32>,

    /// Duplicate a single-sample fragment to fill its duration
    #[arg(long)]
    pub trick_mode: bool,

    /// Timeline JSON to update with live hints; created if missing
    #[arg(long)]
    pub timeline: Option<PathBuf>,

    /// Representation name used in reports
    #[arg(long)]
    pub representation: Option<String>,

    /// DVR window in seconds (defaults to live.dvr_window_secs from config)
    #[arg(long)]
    pub dvr_window: Option<f64>,
}

#[derive(Args)]
pub struct TimelineArgs {
    /// Chunk list JSON: `[{"t":0,"d":20000000,"r":3}, ...]`
    #[arg(required = true)]
    pub chunks: PathBuf,

    /// Clip start in ticks
    #[arg(long, requires = "clip_end")]
    pub clip_begin: Option<u64>,

    /// Clip end in ticks
    #[arg(long, requires = "clip_begin")]
    pub clip_end: Option<u64>,

    /// Timescale of the produced timeline
    #[arg(long, default_value = "10000000")]
    pub timescale: u64,

    /// Print fragment URLs from this template instead of the timeline
    #[arg(long)]
    pub url_template: Option<String>,

    /// Bitrate substituted into the URL template
    #[arg(long, default_value = "0")]
    pub bitrate: u64,

    /// Write the timeline here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct AvailabilityArgs {
    /// Timeline JSON
    #[arg(required = true)]
    pub timeline: PathBuf,

    /// Current presentation time in seconds (live only)
    #[arg(long, default_value = "0")]
    pub now: f64,

    /// Treat the presentation as on-demand
    #[arg(long = "static")]
    pub is_static: bool,

    /// DVR window in seconds (defaults to live.dvr_window_secs from config)
    #[arg(long)]
    pub dvr_window: Option<f64>,
}
