//! EcoLens - live object detection overlay and 3D/AR alternative viewer
//!
//! Command line host that drives every subsystem, headlessly or with a bevy
//! window for the viewer.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use eco_lens::ar::{ArSessionState, ReplayXr, UnsupportedXr, XrRuntime};
use eco_lens::capture::{open_source, CaptureSource, StillImageSource};
use eco_lens::config::{self, AppConfig};
use eco_lens::live::LiveView;
use eco_lens::overlay::{AnimationState, RasterCanvas};
use eco_lens::scene::{EngineFactory, EngineJournal, HeadlessEngineFactory, SceneState, ViewerEvent, ViewerHandle};
use eco_lens::storage;
use eco_lens::EcoLensApp;

/// EcoLens - detection overlay and sustainable alternative viewer
#[derive(Parser, Debug)]
#[command(name = "eco-lens")]
#[command(about = "Overlay object detections on a capture and inspect sustainable alternatives in 3D/AR")]
struct Args {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one detection cycle on an image
    Detect {
        image: PathBuf,
        /// Write the overlay composited on the image
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Run the live detection + overlay loops on an image or a directory of images
    Scan {
        path: PathBuf,
        #[arg(long, default_value = "5")]
        seconds: u64,
        /// Save the last composited frame
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Look up eco information for an object
    Eco { object: String },
    /// Open the 3D viewer for an alternative
    View {
        alternative: String,
        /// Request an AR session once the model is ready
        #[arg(long)]
        ar: bool,
        /// JSON file of recorded hit-test frames
        #[arg(long)]
        hits: Option<PathBuf>,
        /// Render in a window until it is closed (needs the bevy-viewer feature)
        #[arg(long)]
        window: bool,
    },
    /// Show or initialize the configuration
    Config {
        /// Write the default configuration
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    if let Command::Config { init } = &args.command {
        return run_config(args.config.as_deref(), *init);
    }

    let config = load_or_create_config(args.config.as_deref());

    if let Command::View { alternative, ar, hits, window: true } = args.command {
        return run_windowed_view(config, alternative, ar, hits);
    }

    // Detection timer, render loop and viewer all share one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        match args.command {
            Command::Detect { image, annotate } => run_detect(config, &image, annotate.as_deref()).await,
            Command::Scan { path, seconds, output } => {
                run_scan(config, &path, Duration::from_secs(seconds), output.as_deref()).await
            }
            Command::Eco { object } => run_eco(config, &object).await,
            Command::View { alternative, ar, hits, .. } => {
                run_headless_view(config, &alternative, ar, hits.as_deref()).await
            }
            Command::Config { .. } => Ok(()),
        }
    })
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => storage::default_config_path(),
    }
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    if let Ok(config_path) = config_path(explicit) {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => tracing::warn!("Ignoring configuration: {:#}", e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn run_config(explicit: Option<&Path>, init: bool) -> Result<()> {
    let path = config_path(explicit)?;
    if init {
        config::save_config(&AppConfig::default(), &path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = load_or_create_config(explicit);
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
    Ok(())
}

async fn run_detect(config: AppConfig, image: &Path, annotate: Option<&Path>) -> Result<()> {
    let (app, _) = EcoLensApp::headless(config)?;
    let frame = StillImageSource::open(image)?
        .grab()?
        .ok_or_else(|| anyhow!("No frame in {:?}", image))?;

    let predictions = app.detect_once(&frame).await?;
    println!("{} detections", predictions.len());
    for p in &predictions {
        println!(
            "  {:<24} bbox [{:.1}, {:.1}, {:.1}, {:.1}]",
            p.label(),
            p.bbox[0],
            p.bbox[1],
            p.bbox[2],
            p.bbox[3]
        );
    }

    if let Some(out) = annotate {
        let (width, height) = frame.dimensions();
        let mut canvas = RasterCanvas::new(width, height);
        app.renderer()
            .render_frame(&mut canvas, &predictions, AnimationState::default());
        save_composite(&canvas, frame.to_image(), out)?;
    }
    Ok(())
}

async fn run_scan(config: AppConfig, path: &Path, duration: Duration, output: Option<&Path>) -> Result<()> {
    let (app, _) = EcoLensApp::headless(config)?;
    let source: Box<dyn CaptureSource> = open_source(path)?;
    let (pipeline, mut detected) = app.live_view(source, RasterCanvas::new(1, 1), |event| {
        info!("Selected {}", event.class_label);
    });

    let view = LiveView::mount(pipeline);
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    let report = view.unmount().await?;

    let stats = report.stats;
    println!(
        "{} frames drawn, {} requests ({} ok, {} failed), {} skipped in flight, {} not ready, {} capture errors",
        report.frames_drawn,
        stats.submitted,
        stats.succeeded,
        stats.failed,
        stats.skipped_in_flight,
        stats.skipped_not_ready,
        stats.capture_errors
    );
    if stats.consecutive_failures > 0 {
        println!("{} consecutive failures at shutdown", stats.consecutive_failures);
    }

    detected.poll();
    println!("Detected items:");
    for entry in detected.entries() {
        println!("  {}", entry);
    }

    if let (Some(out), Some(frame)) = (output, report.last_frame.as_ref()) {
        save_composite(&report.canvas, frame.to_image(), out)?;
    }
    Ok(())
}

fn save_composite(canvas: &RasterCanvas, frame: Option<RgbaImage>, out: &Path) -> Result<()> {
    let frame = frame.ok_or_else(|| anyhow!("Captured frame has an invalid pixel buffer"))?;
    canvas
        .composite_over(&frame)
        .save(out)
        .with_context(|| format!("Failed to write {:?}", out))?;
    println!("Wrote {}", out.display());
    Ok(())
}

async fn run_eco(config: AppConfig, object: &str) -> Result<()> {
    let (app, _) = EcoLensApp::headless(config)?;
    let info = app.eco_info(object).await;

    println!("{}", object);
    println!("  Recyclable:  {}", info.recyclable);
    println!("  Carbon:      {}", info.carbon);
    println!("  Alternative: {}", info.alternative);
    println!("  Summary:     {}", info.summary);
    for video in &info.videos {
        println!("  Video:       {} <{}>", video.title, video.link);
    }
    for link in &info.links {
        println!("  Link:        {}", link);
    }
    println!(
        "  3D view:     {}",
        if info.has_viewable_alternative() { "available" } else { "unavailable" }
    );
    Ok(())
}

async fn run_headless_view(config: AppConfig, alternative: &str, ar: bool, hits: Option<&Path>) -> Result<()> {
    let journal = EngineJournal::new();
    let engines = Arc::new(HeadlessEngineFactory::new(journal.clone()));
    run_view(config, alternative, ar, hits, engines, std::future::ready(())).await?;

    println!("Engine calls:");
    for (engine, call) in journal.entries() {
        println!("  {:<10} {:?}", engine, call);
    }
    Ok(())
}

#[cfg(feature = "bevy-viewer")]
fn run_windowed_view(config: AppConfig, alternative: String, ar: bool, hits: Option<PathBuf>) -> Result<()> {
    use eco_lens::scene::{run_window, viewer_channel};

    let (factory, plugin) = viewer_channel();
    let factory = Arc::new(factory);
    let engines: Arc<dyn EngineFactory> = factory.clone();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<()>();
    let title = format!("EcoLens - {alternative}");

    // The window needs the main thread, so the viewer flow gets its own
    let flow = std::thread::spawn(move || -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;
        let result = runtime.block_on(async move {
            let until_closed = async move {
                tokio::select! {
                    _ = closed_rx => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            };
            run_view(config, &alternative, ar, hits.as_deref(), engines, until_closed).await
        });
        factory.shutdown();
        result
    });

    let exit = run_window(plugin, &title);
    let _ = closed_tx.send(());
    info!("Viewer window exited: {:?}", exit);
    flow.join().map_err(|_| anyhow!("viewer thread panicked"))?
}

#[cfg(not(feature = "bevy-viewer"))]
fn run_windowed_view(_config: AppConfig, _alternative: String, _ar: bool, _hits: Option<PathBuf>) -> Result<()> {
    Err(anyhow!("eco-lens was built without the bevy-viewer feature; rebuild with --features bevy-viewer"))
}

/// Open `alternative`, optionally place it in AR, then close once `hold` resolves
async fn run_view(
    config: AppConfig,
    alternative: &str,
    ar: bool,
    hits: Option<&Path>,
    engines: Arc<dyn EngineFactory>,
    hold: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let frame_interval = config.viewer.frame_interval();
    let (xr, replay_time): (Arc<dyn XrRuntime>, Duration) = match hits {
        Some(path) => {
            let replay = ReplayXr::from_file(path, frame_interval)?;
            let replay_time = frame_interval * replay.frames().len() as u32;
            (Arc::new(replay), replay_time)
        }
        None => (Arc::new(UnsupportedXr), Duration::ZERO),
    };

    let mut app = EcoLensApp::new(config, xr, engines)?;
    let mut viewer = app
        .open_alternative(alternative, || info!("Viewer closed"))
        .await;

    let settled = print_events_until(&mut viewer, |event| {
        matches!(event, ViewerEvent::StateChanged(s) if s.is_settled())
    })
    .await;

    if ar && settled == Some(ViewerEvent::StateChanged(SceneState::Ready)) {
        viewer.enter_ar();
        let _ = tokio::time::timeout(
            replay_time + Duration::from_secs(1),
            print_events_until(&mut viewer, |event| {
                matches!(event, ViewerEvent::Placed { .. })
                    || matches!(event, ViewerEvent::ArStateChanged(ArSessionState::Unsupported))
            }),
        )
        .await;
    }

    hold.await;

    viewer.close();
    print_events_until(&mut viewer, |event| {
        *event == ViewerEvent::StateChanged(SceneState::Disposed)
    })
    .await;
    viewer.wait_disposed().await;
    Ok(())
}

/// Print viewer events until one matches `stop`, which is returned
async fn print_events_until(viewer: &mut ViewerHandle, stop: impl Fn(&ViewerEvent) -> bool) -> Option<ViewerEvent> {
    while let Some(event) = viewer.next_event().await {
        println!("  {:?}", event);
        if stop(&event) {
            return Some(event);
        }
    }
    None
}
