//! # TESSERA Demo
//!
//! Headless run of the three map roles on real threads:
//! loader workers, the logic thread (this one) and a render thread drawing
//! into a [`HeadlessGpu`]. The view tours a few positions, swaps the theme
//! halfway and prints frame statistics at the end.
//!
//! ```bash
//! tessera_demo                 # defaults, 3 second run
//! tessera_demo map.toml 10     # config file, 10 second run
//! RUST_LOG=debug tessera_demo  # tile life cycle logging
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera::{
    HeadlessGpu, LayerStyle, Map, MapConfig, MapPosition, MapResult, RenderTheme,
    SyntheticSource,
};

/// Dark theme used for the second half of the run.
struct NightTheme;

impl RenderTheme for NightTheme {
    fn map_background(&self) -> [f32; 4] {
        [0.08, 0.09, 0.12, 1.0]
    }

    fn style_for(&self, class: &str, zoom: u8) -> Option<LayerStyle> {
        match class {
            "water" => Some(LayerStyle {
                color: [0.05, 0.12, 0.2, 1.0],
                width: 0.0,
            }),
            "road" if zoom >= 6 => Some(LayerStyle {
                color: [0.45, 0.4, 0.3, 1.0],
                width: 2.0,
            }),
            _ => None,
        }
    }
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_thread_names(true)
        .try_init();

    if let Err(error) = run() {
        tracing::error!(%error, "demo failed");
        std::process::exit(1);
    }
}

fn run() -> MapResult<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => MapConfig::load(path)?,
        None => MapConfig::default(),
    };
    let seconds = args.next().and_then(|s| s.parse().ok()).unwrap_or(3);
    let run_time = Duration::from_secs(seconds);

    let mut map = Map::new(config)?;
    let source = SyntheticSource::new().with_delay(Duration::from_millis(2));
    map.set_tile_source(Some(Arc::new(source.clone())))?;
    map.set_map_position(MapPosition::from_lat_lon(53.08, 8.8, 1024.0)?);

    // === Render thread ===
    let mut frames = map.frame_coordinator(Box::new(HeadlessGpu::new(
        map.config().gpu_memory_budget,
    )))?;
    let frame_budget = map.config().frame_budget();
    let running = Arc::new(AtomicBool::new(true));
    let render_running = Arc::clone(&running);
    let render = std::thread::Builder::new()
        .name("tessera-render".to_owned())
        .spawn(move || {
            while render_running.load(Ordering::Acquire) {
                let start = Instant::now();
                let result = frames.draw_frame();
                tracing::trace!(?result, "frame");
                if let Some(rest) = frame_budget.checked_sub(start.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
            frames.stats()
        })?;

    // === Logic thread ===
    let tour = [
        MapPosition::from_lat_lon(53.55, 9.99, 2048.0)?,
        MapPosition::from_lat_lon(52.52, 13.40, 512.0)?,
        MapPosition::from_lat_lon(48.14, 11.58, 4096.0)?,
    ];
    let started = Instant::now();
    let leg = run_time / 3;
    let mut legs = tour.iter();
    let mut next_leg = Duration::ZERO;
    let mut themed = false;
    while started.elapsed() < run_time {
        if started.elapsed() >= next_leg {
            if let Some(target) = legs.next() {
                map.animate_to(*target, leg / 2);
                next_leg += leg;
            }
        }
        if !themed && started.elapsed() >= run_time / 2 {
            map.set_theme(Arc::new(NightTheme));
            themed = true;
        }
        map.update_map();
        std::thread::sleep(Duration::from_millis(16));
    }

    running.store(false, Ordering::Release);
    let joined = render.join();
    map.shutdown();

    match joined {
        Ok(stats) => tracing::info!(
            frames = stats.total_frames,
            avg_frame_us = stats.avg_frame_time_us,
            worst_frame_us = stats.worst_frame_time_us,
            over_budget = stats.frames_over_budget,
            oom_frames = stats.oom_frames,
            "render stats"
        ),
        Err(_) => tracing::error!("render thread panicked"),
    }
    let loads = map.loader_stats();
    tracing::info!(
        published = loads.published,
        failed = loads.failed,
        stale = loads.stale,
        source_loads = source.load_count(),
        "loader stats"
    );
    Ok(())
}
