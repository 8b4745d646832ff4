//! detect_demo - run one simulated detection end to end
//!
//! Selects an image (file or synthetic), runs the staged processing
//! simulation, applies the filter settings, then writes the rendered canvas
//! and/or the exported detections.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use detect_sim::models::catalog;
use detect_sim::ui::Ui;
use detect_sim::{
    DemoSession, DetectionClass, ImageSource, SessionEvent, SimConfig, VisualizationMode,
};

const DEFAULT_SYNTHETIC_WIDTH: u32 = 640;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 480;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image file to run on. A synthetic scene is used when omitted.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Synthetic scene width.
    #[arg(long, default_value_t = DEFAULT_SYNTHETIC_WIDTH)]
    width: u32,
    /// Synthetic scene height.
    #[arg(long, default_value_t = DEFAULT_SYNTHETIC_HEIGHT)]
    height: u32,
    /// Model id (see --list-models). Overrides the configured default.
    #[arg(long)]
    model: Option<String>,
    /// Confidence threshold, 0.1..=1.0.
    #[arg(long)]
    threshold: Option<f32>,
    /// standard | wireframe | segmentation | heatmap
    #[arg(long, default_value = "standard")]
    mode: VisualizationMode,
    /// Draw the background grid.
    #[arg(long)]
    grid: bool,
    /// Hide a class by label; repeatable.
    #[arg(long = "hide")]
    hidden: Vec<String>,
    #[arg(long, default_value_t = 1.0)]
    zoom: f32,
    #[arg(long, default_value_t = 0.0)]
    pan_x: f32,
    #[arg(long, default_value_t = 0.0)]
    pan_y: f32,
    /// Write the rendered canvas as PNG.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Write visible detections as JSON.
    #[arg(long)]
    export: Option<PathBuf>,
    /// plain | pretty
    #[arg(long, env = "DETECT_SIM_UI")]
    ui: Option<String>,
    /// Print the model catalog and exit.
    #[arg(long)]
    list_models: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_models {
        print_models();
        return Ok(());
    }

    let mut cfg = SimConfig::load()?;
    if let Some(model) = &args.model {
        cfg.default_model = model.clone();
    }
    let ui = Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal());

    let mut session = DemoSession::new(cfg)?;
    let events = session.subscribe()?;

    let source = match &args.image {
        Some(path) => {
            let _stage = ui.stage("load image");
            ImageSource::open(path)?
        }
        None => ImageSource::synthetic("synthetic", args.width, args.height),
    };
    session.select_image(source)?;

    for label in &args.hidden {
        let class = DetectionClass::from_label(label)
            .with_context(|| format!("--hide {}", label))?;
        session.set_class_visibility(class, false)?;
    }
    if let Some(threshold) = args.threshold {
        let applied = session.set_confidence_threshold(threshold)?;
        if (applied - threshold).abs() > f32::EPSILON {
            log::warn!("threshold {} clamped to {}", threshold, applied);
        }
    }
    session.set_visualization_mode(args.mode)?;
    session.set_grid(args.grid)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    let model = session.current_model()?;
    let progress = ui.run_progress(model.display_name);
    let run_id = session.start_detection()?;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            session.cancel_detection()?;
            progress.abandon("interrupted");
            return Err(anyhow!("run {} interrupted", run_id));
        }
        match events.recv_timeout(Duration::from_millis(50)) {
            Ok(SessionEvent::StageAdvanced { run_id: id, stage }) if id == run_id => {
                progress.stage(&stage);
            }
            Ok(SessionEvent::RunFailed { run_id: id, message }) if id == run_id => {
                progress.abandon("failed");
                return Err(anyhow!(message));
            }
            Ok(SessionEvent::RunCompleted { run_id: id, detections }) if id == run_id => {
                progress.finish(&format!("{} detections", detections));
                break;
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("session event stream closed"));
            }
        }
    }
    session.wait_for_run(Duration::from_secs(5))?;

    session.zoom_by(args.zoom)?;
    session.pan_by(args.pan_x, args.pan_y)?;

    let stats = session.stats()?;
    println!(
        "{} visible (avg confidence {:.2}) | precision {:.2} recall {:.2} F1 {:.2} | {:.1} ms",
        stats.detections.total,
        stats.detections.average_confidence,
        stats.metrics.precision,
        stats.metrics.recall,
        stats.metrics.f1,
        stats.metrics.inference_ms,
    );
    for entry in &stats.detections.per_class {
        println!("  {:<16} {}", entry.class.label(), entry.count);
    }

    if let Some(out) = &args.out {
        let _stage = ui.stage("render canvas");
        session.render()?.save_png(out)?;
        log::info!("canvas written to {}", out.display());
    }
    if let Some(export) = &args.export {
        let _stage = ui.stage("export detections");
        std::fs::write(export, session.export_detections()?)
            .with_context(|| format!("failed to write {}", export.display()))?;
        log::info!("detections written to {}", export.display());
    }
    Ok(())
}

fn print_models() {
    println!(
        "{:<10} {:<16} {:<7} {:<9} {:>9} {:>4} {:>6}",
        "id", "name", "speed", "accuracy", "size", "fps", "mAP"
    );
    for model in catalog() {
        println!(
            "{:<10} {:<16} {:<7} {:<9} {:>9} {:>4} {:>6.1}",
            model.id,
            model.display_name,
            format!("{:?}", model.speed_tier).to_lowercase(),
            format!("{:?}", model.accuracy_tier).to_lowercase(),
            model.size_label,
            model.fps,
            model.mean_ap,
        );
    }
}
