//! pinalbum: photo albums for map pins.
//!
//! A pin is a coordinate. Opening its album searches Flickr once for nearby
//! photos, resolves each hit to a small rendition, downloads them
//! concurrently and keeps the bytes in a local SQLite database, so the album
//! is there on the next run without touching the network again.

#![warn(clippy::all)]

mod album;
mod cli;
mod config;
mod download;
mod flickr;
mod shutdown;
mod state;
mod types;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use album::{AlbumState, AlbumSyncController, SyncError, SyncPhase};
use cli::{Command, PinCommand, ViewportCommand};
use config::Config;
use state::{PhotoChange, PhotoStore, SqlitePhotoStore};
use types::{Coordinate, Viewport};

/// Build the controller with live Flickr and HTTP clients.
fn build_controller(
    config: &Config,
    store: Arc<SqlitePhotoStore>,
) -> anyhow::Result<Arc<AlbumSyncController>> {
    let flickr_config = config.flickr_config()?;
    let client = Client::builder()
        .timeout(config.timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let source = flickr::FlickrClient::new(client.clone(), &flickr_config)?;
    let fetcher = download::HttpImageFetcher::new(client);

    Ok(Arc::new(AlbumSyncController::new(
        store,
        Arc::new(source),
        Arc::new(fetcher),
        config.sync_config(),
    )))
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

async fn require_pin(store: &dyn PhotoStore, pin: Coordinate) -> anyhow::Result<()> {
    if store.pin(pin).await?.is_none() {
        anyhow::bail!("No pin at {pin}. Place it first with `pinalbum pin add`.");
    }
    Ok(())
}

async fn print_album(store: &dyn PhotoStore, pin: Coordinate) -> anyhow::Result<()> {
    let photos = store.photos(pin).await?;
    if photos.is_empty() {
        println!("{}", AlbumState::Empty);
        return Ok(());
    }
    println!("{:>8}  {:<16} {:>9}", "ROW", "PHOTO ID", "BYTES");
    for photo in photos {
        println!(
            "{:>8}  {:<16} {:>9}",
            photo.id,
            photo.photo_id,
            photo.data.len()
        );
    }
    Ok(())
}

async fn run_pin_add(store: &dyn PhotoStore, pin: Coordinate) -> anyhow::Result<()> {
    let record = store.add_pin(pin).await?;
    println!(
        "Pin {} placed {} ({} photos)",
        record.coordinate,
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        record.photo_count
    );
    Ok(())
}

async fn run_pin_list(store: &dyn PhotoStore) -> anyhow::Result<()> {
    let pins = store.list_pins().await?;
    if pins.is_empty() {
        println!("No pins placed.");
        return Ok(());
    }
    for pin in pins {
        println!(
            "{:>11.6} {:>11.6}  {:>4} photos  (placed {})",
            pin.coordinate.latitude(),
            pin.coordinate.longitude(),
            pin.photo_count,
            pin.created_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

async fn run_pin_remove(store: &dyn PhotoStore, pin: Coordinate) -> anyhow::Result<()> {
    if store.delete_pin(pin).await? {
        println!("Removed pin {pin}");
    } else {
        println!("No pin at {pin}");
    }
    Ok(())
}

enum AlbumExit {
    Settled(Result<Result<AlbumState, SyncError>, tokio::task::JoinError>),
    Left,
}

/// Open the album view: activate the pin and render inserts as they land.
///
/// Ctrl-C leaves the view. The subscription is released at once, but the
/// process waits for the running generation so finished downloads are kept.
async fn run_album(
    config: &Config,
    store: Arc<SqlitePhotoStore>,
    pin: Coordinate,
) -> anyhow::Result<()> {
    require_pin(&*store, pin).await?;
    let controller = build_controller(config, Arc::clone(&store))?;
    let shutdown_token = shutdown::install_signal_handler()?;

    let mut subscription = store.observe(pin);
    let mut snapshots = controller.watch(pin);
    let pb = create_progress_bar(config.no_progress_bar, u64::from(config.page_size));

    let mut activation = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.activate(pin).await })
    };

    let exit = loop {
        tokio::select! {
            Some(change) = subscription.recv() => match change {
                PhotoChange::Inserted { photo_id, .. } => {
                    pb.inc(1);
                    pb.set_message(photo_id);
                }
                PhotoChange::Deleted { .. } => {}
            },
            Ok(()) = snapshots.changed() => {
                let snapshot = *snapshots.borrow_and_update();
                tracing::debug!(
                    generation = snapshot.generation,
                    phase = %snapshot.phase,
                    "Album phase changed"
                );
                if snapshot.phase == SyncPhase::FetchingRemote {
                    pb.set_message("searching");
                }
            }
            result = &mut activation => break AlbumExit::Settled(result),
            _ = shutdown_token.cancelled() => break AlbumExit::Left,
        }
    };
    drop(subscription);

    match exit {
        AlbumExit::Settled(outcome) => {
            pb.finish_and_clear();
            let state = outcome??;
            println!("Album for {pin}: {state}");
        }
        AlbumExit::Left => {
            pb.abandon();
            let snapshot = controller.wait_settled(pin).await;
            println!("Left album for {pin}: {}", snapshot.state);
            return Ok(());
        }
    }
    print_album(&*store, pin).await
}

async fn run_new_collection(
    config: &Config,
    store: Arc<SqlitePhotoStore>,
    pin: Coordinate,
) -> anyhow::Result<()> {
    require_pin(&*store, pin).await?;
    let controller = build_controller(config, Arc::clone(&store))?;

    // Settle the album first; with no local photos that already is a fresh fetch.
    let had_photos = controller.has_photos(pin).await?;
    let mut state = controller.activate(pin).await?;
    if had_photos {
        state = controller.request_new_collection(pin).await?;
    }

    println!("New collection for {pin}: {state}");
    print_album(&*store, pin).await
}

async fn run_delete_photo(store: &dyn PhotoStore, pin: Coordinate, id: i64) -> anyhow::Result<()> {
    match store.photo(id).await? {
        Some(photo) if photo.pin == pin => {
            store.delete_photo(id).await?;
            let state = AlbumState::from_count(store.count(pin).await?);
            println!("Deleted photo {} (row {id}); album now {state}", photo.photo_id);
        }
        _ => anyhow::bail!("Pin {pin} has no photo with row id {id}"),
    }
    Ok(())
}

/// Keep only characters that are safe in a file name.
fn sanitize_photo_id(photo_id: &str) -> String {
    photo_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

async fn run_export(store: &dyn PhotoStore, pin: Coordinate, directory: &Path) -> anyhow::Result<()> {
    let photos = store.photos(pin).await?;
    if photos.is_empty() {
        println!("{}", AlbumState::Empty);
        return Ok(());
    }

    tokio::fs::create_dir_all(directory)
        .await
        .with_context(|| format!("Failed to create {}", directory.display()))?;

    for photo in &photos {
        let path = directory.join(format!(
            "{}-{}.jpg",
            sanitize_photo_id(&photo.photo_id),
            photo.id
        ));
        tokio::fs::write(&path, &photo.data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), bytes = photo.data.len(), "Exported photo");
    }
    println!("Exported {} photo(s) to {}", photos.len(), directory.display());
    Ok(())
}

async fn run_viewport_set(store: &dyn PhotoStore, args: cli::ViewportArgs) -> anyhow::Result<()> {
    // Validates the center the same way a pin is validated.
    let center = Coordinate::new(args.lat, args.lon)?;
    if args.lat_delta <= 0.0 || args.lon_delta <= 0.0 {
        anyhow::bail!("Viewport spans must be positive");
    }
    store
        .save_viewport(Viewport {
            center_latitude: center.latitude(),
            center_longitude: center.longitude(),
            latitude_delta: args.lat_delta,
            longitude_delta: args.lon_delta,
        })
        .await?;
    println!("Saved viewport centered on {center}");
    Ok(())
}

fn print_viewport(viewport: Option<Viewport>) {
    match viewport {
        Some(v) => println!(
            "Viewport: center ({}, {}), span {} x {}",
            v.center_latitude, v.center_longitude, v.latitude_delta, v.longitude_delta
        ),
        None => println!("Viewport: not saved"),
    }
}

async fn run_status(store: &SqlitePhotoStore) -> anyhow::Result<()> {
    let pins = store.list_pins().await?;
    let photos: u64 = pins.iter().map(|p| p.photo_count).sum();

    println!("Database: {}", store.path().display());
    println!();
    println!("Pins:   {}", pins.len());
    println!("Photos: {photos}");
    let empty = pins.iter().filter(|p| p.photo_count == 0).count();
    if empty > 0 {
        println!("  ({empty} pin(s) without photos)");
    }
    println!();
    print_viewport(store.load_viewport().await?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = Config::from_cli(&cli)?;
    tracing::debug!(?config, "Loaded configuration");

    let store = Arc::new(SqlitePhotoStore::open(&config.db_path).await?);

    match cli.command {
        Command::Pin(PinCommand::Add(args)) => run_pin_add(&*store, args.coordinate()?).await,
        Command::Pin(PinCommand::List) => run_pin_list(&*store).await,
        Command::Pin(PinCommand::Remove(args)) => {
            run_pin_remove(&*store, args.coordinate()?).await
        }
        Command::Album(args) => run_album(&config, store, args.coordinate()?).await,
        Command::NewCollection(args) => {
            run_new_collection(&config, store, args.coordinate()?).await
        }
        Command::DeletePhoto(args) => {
            run_delete_photo(&*store, args.pin.coordinate()?, args.id).await
        }
        Command::Export(args) => {
            let directory = config::expand_tilde(&args.directory);
            run_export(&*store, args.pin.coordinate()?, &directory).await
        }
        Command::Viewport(ViewportCommand::Set(args)) => {
            run_viewport_set(&*store, args).await
        }
        Command::Viewport(ViewportCommand::Show) => {
            print_viewport(store.load_viewport().await?);
            Ok(())
        }
        Command::Status => run_status(&store).await,
    }
}
