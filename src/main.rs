use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use slidesync::io::{Footage, FrameSource, SlideLibrary, VideoFootage, FRAMESKIP};
use slidesync::system::SyncDriver;
use slidesync::tracking::TrackerConfig;

/// Synchronize a slide deck with a video recording of its presentation.
#[derive(Debug, Parser)]
#[command(author, version, about = "Slide-video synchronizer")]
struct Args {
    /// Input recording of the presentation.
    #[arg(long)]
    footage: PathBuf,

    /// Directory of rasterized presentation slides, in page order.
    #[arg(long)]
    slides: PathBuf,

    /// Output synchronization file.
    #[arg(long)]
    sync: PathBuf,

    /// Output synchronized video file.
    #[arg(long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    // intermediate and cached results live next to the footage
    let intermediate_dir = PathBuf::from(format!("{}.d", args.footage.display()));

    info!("reading footage file {:?}", args.footage);
    let source = VideoFootage::open(&args.footage)?;

    let width = source.width();
    let height = source.height();

    info!("reading slides from {:?}", args.slides);
    let slides = SlideLibrary::load(
        &args.slides,
        &intermediate_dir.join("slides"),
        width,
        height,
    )?;
    info!("loaded {} slides", slides.len());

    let footage = Footage::new(source, FRAMESKIP);

    let mut driver = SyncDriver::new(
        footage,
        slides,
        intermediate_dir.join("raw.sync"),
        args.sync,
        args.output,
        TrackerConfig::default(),
    )?;

    driver.run()
}
