use clap::{Args, Parser, Subcommand};

use crate::flickr::{DEFAULT_API_BASE, DEFAULT_PAGE_SIZE};
use crate::types::{Coordinate, CoordinateError, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "pinalbum", about = "Photo albums for map pins, fetched from Flickr")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Flickr API key. Required by commands that fetch photos.
    #[arg(long, env = "FLICKR_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Flickr REST endpoint
    #[arg(long, default_value = DEFAULT_API_BASE, global = true)]
    pub api_base: String,

    /// Local photo database
    #[arg(long, default_value = "~/.pinalbum/pinalbum.db", global = true)]
    pub db_path: String,

    /// Photos requested per pin (one page)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, global = true)]
    pub page_size: u32,

    /// Maximum concurrent resolve+download tasks
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE as usize, global = true)]
    pub max_concurrent: usize,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout_secs: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Place, list or remove pins
    #[command(subcommand)]
    Pin(PinCommand),

    /// Open a pin's album, fetching photos if it has none yet
    Album(PinArgs),

    /// Replace a pin's photos with a fresh page from Flickr
    NewCollection(PinArgs),

    /// Delete one photo from a pin's album
    DeletePhoto(DeletePhotoArgs),

    /// Write a pin's photos to a directory
    Export(ExportArgs),

    /// Save or show the last map viewport
    #[command(subcommand)]
    Viewport(ViewportCommand),

    /// Show pins, photo counts and the saved viewport
    Status,
}

#[derive(Subcommand, Debug)]
pub enum PinCommand {
    /// Place a pin
    Add(PinArgs),
    /// List pins with their photo counts
    List,
    /// Remove a pin and all of its photos
    Remove(PinArgs),
}

#[derive(Subcommand, Debug)]
pub enum ViewportCommand {
    /// Save the map viewport
    Set(ViewportArgs),
    /// Print the saved viewport
    Show,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct PinArgs {
    /// Latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,
}

impl PinArgs {
    pub fn coordinate(&self) -> Result<Coordinate, CoordinateError> {
        Coordinate::new(self.lat, self.lon)
    }
}

#[derive(Args, Debug)]
pub struct DeletePhotoArgs {
    #[command(flatten)]
    pub pin: PinArgs,

    /// Row id of the photo (see `album` output)
    #[arg(long)]
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub pin: PinArgs,

    /// Output directory
    #[arg(short = 'd', long)]
    pub directory: String,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct ViewportArgs {
    /// Center latitude
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Center longitude
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Visible latitude span in degrees
    #[arg(long)]
    pub lat_delta: f64,

    /// Visible longitude span in degrees
    #[arg(long)]
    pub lon_delta: f64,
}
