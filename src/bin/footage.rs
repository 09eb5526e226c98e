//! footage - analyze recorded video from the command line
//!
//! Every subcommand prints its result as JSON on stdout. Stage and progress
//! reporting goes to stderr.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use footage_kernel::clip::clip_file_name;
use footage_kernel::{
    annotate_vehicles, detect_object_loss, extract_clip, extract_frames, find_objects,
    find_objects_in_images, rank_proximity, summarize_dir, AnalysisConfig, AnalysisContext,
    BoundingBox, ClipSpec, DetectorBackend, ExtractRequest, ScriptedBackend, VideoBackend,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "footage", author, version, about = "Object ranking, loss detection and evidence clips for recorded video")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "FOOTAGE_CONFIG", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Output directory for images and clips (overrides config)
    #[arg(long, value_name = "DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE", global = true)]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Container metadata of every recording in a directory
    Info { dir: PathBuf },
    /// Rank vehicles by size in the frame at --start
    Annotate {
        video: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
    },
    /// Find the vehicles that came closest to a reference box
    Proximity {
        video: PathBuf,
        /// Reference box as x1,y1,x2,y2
        #[arg(long = "box", value_parser = parse_box, value_name = "X1,Y1,X2,Y2")]
        reference: BoundingBox,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
    },
    /// First recording in a directory where an object goes missing
    Loss {
        dir: PathBuf,
        #[arg(long)]
        label: String,
        #[arg(long = "box", value_parser = parse_box, value_name = "X1,Y1,X2,Y2")]
        reference: BoundingBox,
    },
    /// Save frames showing a labelled object
    Search {
        dir: PathBuf,
        #[arg(long, value_name = "DIR")]
        images: PathBuf,
        #[arg(long)]
        label: String,
        /// Defaults to the configured search confidence
        #[arg(long)]
        min_confidence: Option<f32>,
    },
    /// Find a labelled object in a directory of still images
    SearchImages {
        dir: PathBuf,
        #[arg(long)]
        label: String,
        /// Defaults to the configured search confidence
        #[arg(long)]
        min_confidence: Option<f32>,
        /// Draw matching boxes back into the images
        #[arg(long)]
        draw: bool,
    },
    /// Save still frames from every recording in a directory
    Extract {
        dir: PathBuf,
        #[arg(long, value_name = "DIR")]
        images: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Seconds to cover; 0 runs to the end
        #[arg(long, default_value_t = 0.0)]
        duration: f64,
        #[arg(long, default_value_t = 1.0)]
        fps: f64,
        /// Per-recording image cap; 0 is unlimited
        #[arg(long, default_value_t = 0)]
        max: u64,
    },
    /// Copy a time window of a recording to a new file
    Clip {
        video: PathBuf,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        end: f64,
        /// Output file; defaults to a generated name in the output directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_box(value: &str) -> Result<BoundingBox, String> {
    let parts: Vec<i32> = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid box '{value}': {e}"))?;
    match parts.as_slice() {
        [x1, y1, x2, y2] => {
            let bbox = BoundingBox::new(*x1, *y1, *x2, *y2);
            if bbox.is_valid() {
                Ok(bbox)
            } else {
                Err(format!("box '{value}' needs x1 < x2 and y1 < y2"))
            }
        }
        _ => Err(format!("box '{value}' must have four comma separated values")),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = {
        let _stage = ui.stage("Load configuration");
        AnalysisConfig::load_from(args.config.as_deref()).context("failed to load configuration")?
    };
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }

    let video = open_video_backend()?;
    let detector = {
        let _stage = ui.stage("Load detector");
        open_detector(&config)?
    };
    let mut ctx = AnalysisContext::new(config, video, detector);
    let bar = ui.progress("frames");
    let progress = bar.clone();
    ctx = ctx.with_progress(move |current, total| ui::update_progress(&progress, current, total));

    match args.command {
        Command::Info { dir } => {
            let summaries = {
                let _stage = ui.stage("Read video info");
                summarize_dir(&ctx, &dir)?
            };
            print_json(&summaries)
        }
        Command::Annotate { video, start } => {
            let ranking = {
                let _stage = ui.stage("Rank vehicles by size");
                annotate_vehicles(&mut ctx, &video, start)?
            };
            bar.finish_and_clear();
            print_json(&ranking)
        }
        Command::Proximity {
            video,
            reference,
            start,
        } => {
            let hits = {
                let _stage = ui.stage("Rank vehicles by proximity");
                rank_proximity(&mut ctx, &video, reference, start)?
            };
            bar.finish_and_clear();
            print_json(&hits)
        }
        Command::Loss {
            dir,
            label,
            reference,
        } => {
            let report = {
                let _stage = ui.stage("Detect object loss");
                detect_object_loss(&mut ctx, &dir, &label, reference)?
            };
            bar.finish_and_clear();
            if report.is_none() {
                log::info!("'{}' was not lost in any recording of {}", label, dir.display());
            }
            print_json(&report)
        }
        Command::Search {
            dir,
            images,
            label,
            min_confidence,
        } => {
            let min_confidence = min_confidence.unwrap_or(ctx.config.search.min_confidence);
            let outcome = {
                let _stage = ui.stage("Search recordings");
                find_objects(&mut ctx, &dir, &images, &label, min_confidence)?
            };
            bar.finish_and_clear();
            print_json(&outcome)
        }
        Command::SearchImages {
            dir,
            label,
            min_confidence,
            draw,
        } => {
            let min_confidence = min_confidence.unwrap_or(ctx.config.search.min_confidence);
            let matches = {
                let _stage = ui.stage("Search images");
                find_objects_in_images(&mut ctx, &dir, &label, min_confidence, draw)?
            };
            bar.finish_and_clear();
            print_json(&matches)
        }
        Command::Extract {
            dir,
            images,
            start,
            duration,
            fps,
            max,
        } => {
            let request = ExtractRequest {
                start_time: start,
                duration,
                frames_per_second: fps,
                max_images: max,
            };
            let summaries = {
                let _stage = ui.stage("Extract frames");
                extract_frames(&mut ctx, &dir, &images, &request)?
            };
            bar.finish_and_clear();
            print_json(&summaries)
        }
        Command::Clip {
            video,
            start,
            end,
            out,
        } => {
            let output = match out {
                Some(path) => path,
                None => default_clip_path(&ctx, &video)?,
            };
            let clip = {
                let _stage = ui.stage("Write clip");
                extract_clip(&mut ctx, &ClipSpec::new(&video, start, end), &output)?
            };
            bar.finish_and_clear();
            print_json(&clip)
        }
    }
}

fn default_clip_path(ctx: &AnalysisContext, video: &Path) -> Result<PathBuf> {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("cannot derive a clip name from {}", video.display()))?;
    Ok(ctx.config.output_dir.join(clip_file_name(&stem, 1, "clip")))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(feature = "video-ffmpeg")]
fn open_video_backend() -> Result<Box<dyn VideoBackend>> {
    let backend = footage_kernel::video::ffmpeg::FfmpegBackend::new()?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "video-ffmpeg"))]
fn open_video_backend() -> Result<Box<dyn VideoBackend>> {
    Err(anyhow!(
        "footage was built without video support; rebuild with --features video-ffmpeg"
    ))
}

fn open_detector(config: &AnalysisConfig) -> Result<Box<dyn DetectorBackend>> {
    match config.detector.backend.as_str() {
        "scripted" => {
            log::warn!("scripted detector selected: no objects will be detected");
            Ok(Box::new(ScriptedBackend::new()))
        }
        "tract" => open_tract(config),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(config: &AnalysisConfig) -> Result<Box<dyn DetectorBackend>> {
    let settings = &config.detector;
    let backend = footage_kernel::detect::TractBackend::new(&settings.model_path, settings.input_size)?
        .with_thresholds(settings.confidence, settings.nms_iou);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(_config: &AnalysisConfig) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' requires building with --features backend-tract"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_boxes() {
        assert_eq!(parse_box("1, 2,30,40").unwrap(), BoundingBox::new(1, 2, 30, 40));
        assert!(parse_box("1,2,3").is_err());
        assert!(parse_box("30,2,1,40").is_err());
        assert!(parse_box("a,b,c,d").is_err());
    }
}
