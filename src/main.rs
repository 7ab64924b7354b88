mod audio;
mod clock;
mod error;
mod pipeline;
mod platform;
mod queue;
mod video;

use std::process::ExitCode;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use tracing::error;

use crate::clock::SyncMode;
use crate::platform::surface::{MinifbSurface, NullSurface};

/// Terminal-driven A/V playback pipeline.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the media file to play.
    input: String,

    /// Which clock drives playback timing; the others are stretched or
    /// dropped to chase it.
    #[arg(long, value_enum, default_value_t = SyncMode::Video)]
    sync: SyncMode,

    /// Run the pipeline without opening a display surface: decodes and
    /// drives clocks/queues but skips blitting.
    #[arg(long)]
    no_window: bool,
}

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

fn main() -> ExitCode {
    let args = Args::parse();
    ffmpeg_next::init().expect("failed to initialize ffmpeg");

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("off,avplay=info"))
        .unwrap();
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let result = if args.no_window {
        let surface = NullSurface::new(WINDOW_WIDTH, WINDOW_HEIGHT);
        pipeline::run(&args.input, args.sync, surface)
    } else {
        match MinifbSurface::new("avplay", WINDOW_WIDTH, WINDOW_HEIGHT) {
            Ok(surface) => pipeline::run(&args.input, args.sync, surface),
            Err(e) => Err(error::PlayerError::Startup(format!(
                "failed to open display window: {e}"
            ))),
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
