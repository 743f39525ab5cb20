use std::path::PathBuf;

use anyhow::ensure;
use anyhow::Context;
use clap::Parser;
use soundcloud_archiver::playlist;
use soundcloud_archiver::Archiver;
use soundcloud_archiver::Settings;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

/// Archives a SoundCloud user's uploaded tracks into a local directory
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Archive directory containing a `.soundcloud` settings file
    path: PathBuf,

    /// Only fetch tracks newer than the most recent one already archived
    #[arg(long)]
    latest: bool,

    /// Suppress size mismatch warnings for files already on disk
    #[arg(short = 'w', long)]
    no_warnings: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    ensure!(
        args.path.is_dir(),
        "Archive directory must exist: {}",
        args.path.to_string_lossy()
    );
    let path = args
        .path
        .canonicalize()
        .context("failed to resolve archive directory")?;

    let settings = Settings::load(&path)?;

    let archiver = Archiver::builder()
        .path(&path)
        .client_id(settings.main.client_id)
        .latest_only(args.latest)
        .suppress_warnings(args.no_warnings)
        .build();
    let report = archiver.sync(&settings.main.permalink)?;
    info!(
        tracks_seen = report.tracks_seen,
        downloaded = report.downloaded,
        already_archived = report.already_archived,
        size_mismatches = report.size_mismatches,
        failed = report.failed,
        "Sync finished"
    );

    let entries = playlist::write_playlist(&path)?;
    info!(entries, "Playlist written");

    Ok(())
}
