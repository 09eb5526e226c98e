//! Search for frames showing a labelled object across a directory of
//! recordings.
//!
//! Recordings are sampled every N frames. A sample is a hit when the label
//! appears at or above the confidence floor. Hits in consecutive seconds of
//! the same recording form one run, and only the most confident frame of
//! each run is written, annotated with every matching box.

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Serialize;

use crate::context::{ensure_dir, AnalysisContext};
use crate::detect::{Detection, DetectionFilter};
use crate::error::{AnalysisError, AnalysisResult};
use crate::render::GREEN;
use crate::sampler::{Cadence, FrameSampler, SampledFrame};
use crate::video::{format_clock, Frame};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub image_path: PathBuf,
    pub video: PathBuf,
    pub seconds: f64,
    pub max_confidence: f32,
    pub matches: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "hits", rename_all = "snake_case")]
pub enum SearchOutcome {
    Found(Vec<SearchHit>),
    NotFound,
}

impl SearchOutcome {
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            SearchOutcome::Found(hits) => hits,
            SearchOutcome::NotFound => &[],
        }
    }
}

struct Candidate {
    second: u64,
    sample: SampledFrame,
    image_path: PathBuf,
    detections: Vec<Detection>,
    max_confidence: f32,
}

/// Most confident candidate of the current run of consecutive seconds.
#[derive(Default)]
struct RunCollapser {
    best: Option<Candidate>,
    last_second: Option<u64>,
}

impl RunCollapser {
    /// Adds `candidate`; returns the best of the previous run when this one
    /// starts a new run.
    fn push(&mut self, candidate: Candidate) -> Option<Candidate> {
        let continues = self
            .last_second
            .is_some_and(|last| candidate.second == last || candidate.second == last + 1);
        self.last_second = Some(candidate.second);
        if !continues {
            return self.best.replace(candidate);
        }
        match &self.best {
            Some(best) if best.max_confidence >= candidate.max_confidence => {}
            _ => self.best = Some(candidate),
        }
        None
    }

    fn finish(&mut self) -> Option<Candidate> {
        self.last_second = None;
        self.best.take()
    }
}

/// Searches every recording in `video_dir` for `label`, writing one image per
/// run of hits into `image_dir`.
pub fn find_objects(
    ctx: &mut AnalysisContext,
    video_dir: &Path,
    image_dir: &Path,
    label: &str,
    min_confidence: f32,
) -> AnalysisResult<SearchOutcome> {
    let files = ctx.video().list_videos(video_dir)?;
    if files.is_empty() {
        log::info!("search: no recordings in {}", video_dir.display());
        return Ok(SearchOutcome::NotFound);
    }
    ensure_dir(image_dir)?;

    let cadence = Cadence::EveryNthFrame {
        frames: ctx.config.search.sample_every_frames,
    };
    let mut filter = DetectionFilter::label(label).with_min_confidence(min_confidence);
    if let Some(class_id) = ctx.detector().class_id(label) {
        filter.class_ids = Some(vec![class_id]);
    }

    let mut hits = Vec::new();
    for (i, file) in files.iter().enumerate() {
        let video_index = i + 1;
        let source = match ctx.video().open(file) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("search: skipping {}: {}", file.display(), e);
                continue;
            }
        };
        let mut sampler = match FrameSampler::new(source, 0.0, cadence) {
            Ok(sampler) => sampler,
            Err(e) => {
                log::warn!("search: skipping {}: {}", file.display(), e);
                continue;
            }
        };
        let mut runs = RunCollapser::default();
        while let Some(sample) = sampler.next() {
            let detections = ctx.detector().detect(&sample.frame, &filter)?;
            ctx.report_progress(sampler.yielded(), sampler.estimated_total());
            let Some(max_confidence) = detections.iter().map(|d| d.confidence).reduce(f32::max)
            else {
                continue;
            };
            let name = format!("{video_index:02}-{}.jpg", format_clock(sample.timestamp, '-'));
            let candidate = Candidate {
                second: sample.timestamp as u64,
                image_path: image_dir.join(name),
                sample,
                detections,
                max_confidence,
            };
            if let Some(best) = runs.push(candidate) {
                hits.push(write_hit(ctx, file, best)?);
            }
        }
        if let Some(best) = runs.finish() {
            hits.push(write_hit(ctx, file, best)?);
        }
    }

    log::info!("search: {} images of '{}' written to {}", hits.len(), label, image_dir.display());
    if hits.is_empty() {
        Ok(SearchOutcome::NotFound)
    } else {
        Ok(SearchOutcome::Found(hits))
    }
}

fn write_hit(ctx: &AnalysisContext, video: &Path, candidate: Candidate) -> AnalysisResult<SearchHit> {
    let Candidate {
        sample,
        image_path,
        detections,
        max_confidence,
        ..
    } = candidate;
    let mut image = sample.frame.image;
    draw_matches(ctx, &mut image, &detections);
    image
        .save(&image_path)
        .map_err(|e| AnalysisError::write(&image_path, e))?;
    Ok(SearchHit {
        image_path,
        video: video.to_path_buf(),
        seconds: sample.timestamp,
        max_confidence,
        matches: detections.len(),
    })
}

/// Still image extensions scanned by `find_objects_in_images`.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Image in which the label was found, with every matching detection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImageMatch {
    pub image_path: PathBuf,
    pub max_confidence: f32,
    pub detections: Vec<Detection>,
}

/// Still images in `dir`, sorted by file name.
pub fn list_image_files(dir: &Path) -> AnalysisResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| AnalysisError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| AnalysisError::io(dir, e))?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)));
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Searches the still images in `image_dir` for `label`.
///
/// Images are numbered from 0 in file-name order and progress is reported
/// once per image. With `draw_boxes`, each image with a match is rewritten in
/// place with its matching boxes and `"{n}-{label} {confidence:.2}"` labels.
/// Images that cannot be decoded are skipped with a warning.
pub fn find_objects_in_images(
    ctx: &mut AnalysisContext,
    image_dir: &Path,
    label: &str,
    min_confidence: f32,
    draw_boxes: bool,
) -> AnalysisResult<Vec<ImageMatch>> {
    let files = list_image_files(image_dir)?;
    let total = files.len() as u64;
    let mut filter = DetectionFilter::label(label).with_min_confidence(min_confidence);
    if let Some(class_id) = ctx.detector().class_id(label) {
        filter.class_ids = Some(vec![class_id]);
    }

    let mut matches = Vec::new();
    for (i, path) in files.into_iter().enumerate() {
        let image = match image::open(&path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                log::warn!("search: skipping image {}: {}", path.display(), e);
                ctx.report_progress(i as u64 + 1, total);
                continue;
            }
        };
        let mut frame = Frame {
            index: i as u64,
            image,
        };
        let detections = ctx.detector().detect(&frame, &filter)?;
        ctx.report_progress(i as u64 + 1, total);
        let Some(max_confidence) = detections.iter().map(|d| d.confidence).reduce(f32::max) else {
            continue;
        };
        if draw_boxes {
            draw_matches(ctx, &mut frame.image, &detections);
            frame
                .image
                .save(&path)
                .map_err(|e| AnalysisError::write(&path, e))?;
        }
        matches.push(ImageMatch {
            image_path: path,
            max_confidence,
            detections,
        });
    }
    log::info!(
        "search: '{}' found in {} of {} images in {}",
        label,
        matches.len(),
        total,
        image_dir.display()
    );
    Ok(matches)
}

fn draw_matches(ctx: &AnalysisContext, image: &mut RgbImage, detections: &[Detection]) {
    for (i, detection) in detections.iter().enumerate() {
        let text = format!("{}-{} {:.2}", i + 1, detection.label, detection.confidence);
        ctx.renderer().draw_box(image, &detection.bbox, GREEN);
        ctx.renderer()
            .draw_label(image, detection.bbox.x1, detection.bbox.y1, &text, GREEN);
    }
}
