//! Still-frame extraction from every recording in a directory.

use std::path::Path;

use serde::Serialize;

use crate::context::{ensure_dir, AnalysisContext};
use crate::error::{AnalysisError, AnalysisResult};
use crate::video::format_clock;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractRequest {
    pub start_time: f64,
    /// Seconds to cover from `start_time`; zero runs to the end.
    pub duration: f64,
    /// Images per second of footage.
    pub frames_per_second: f64,
    /// Per-recording image cap; zero is unlimited.
    pub max_images: u64,
}

impl ExtractRequest {
    fn validate(&self) -> AnalysisResult<()> {
        if !(self.frames_per_second.is_finite() && self.frames_per_second > 0.0) {
            return Err(AnalysisError::config("frames_per_second must be positive"));
        }
        if !(self.start_time >= 0.0 && self.duration >= 0.0) {
            return Err(AnalysisError::config("start time and duration must not be negative"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractSummary {
    pub file: String,
    pub duration: f64,
    pub image_count: u64,
}

/// Image name: `{video:02}-{hh}-{mm}-{ss}-{n_in_second:02}-{image:05}.jpg`.
pub fn frame_image_name(video_index: usize, seconds: f64, n_in_second: u64, image_index: u64) -> String {
    format!(
        "{video_index:02}-{}-{n_in_second:02}-{image_index:05}.jpg",
        format_clock(seconds, '-')
    )
}

/// Saves JPEG stills from each recording in `video_dir` into `output_dir`.
///
/// Recordings are numbered from 1 in file-name order. A start time past the
/// end of any recording fails the whole extraction with `OutOfRange`.
pub fn extract_frames(
    ctx: &mut AnalysisContext,
    video_dir: &Path,
    output_dir: &Path,
    request: &ExtractRequest,
) -> AnalysisResult<Vec<ExtractSummary>> {
    request.validate()?;
    ensure_dir(output_dir)?;
    let files = ctx.video().list_videos(video_dir)?;
    if files.is_empty() {
        log::info!("extract: no recordings in {}", video_dir.display());
    }

    let mut summaries = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        let video_index = i + 1;
        let mut source = ctx.video().open(file)?;
        let props = source.properties();
        if props.fps <= 0.0 {
            log::warn!("extract: skipping {} with zero frame rate", file.display());
            continue;
        }
        props.check_start(request.start_time)?;
        let end_time = if request.duration > 0.0 {
            (request.start_time + request.duration).min(props.duration())
        } else {
            props.duration()
        };
        let start_frame = props.frame_at(request.start_time);
        let end_frame = props.frame_at(end_time).min(props.frame_count);
        let frame_interval = props.fps / request.frames_per_second;
        let estimated = ((end_time - request.start_time) * request.frames_per_second).ceil() as u64;

        source.seek_frame(start_frame)?;
        let mut next_extract = 0.0f64;
        let mut image_count = 0u64;
        for offset in 0..end_frame.saturating_sub(start_frame) {
            if request.max_images > 0 && image_count >= request.max_images {
                break;
            }
            let frame = match source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("extract: stopping {} early: {}", file.display(), e);
                    break;
                }
            };
            if (offset as f64) < next_extract {
                continue;
            }
            next_extract += frame_interval;
            image_count += 1;

            let seconds = props.timestamp_of(frame.index);
            let n_in_second = (seconds.fract() * request.frames_per_second) as u64 + 1;
            let path = output_dir.join(frame_image_name(video_index, seconds, n_in_second, image_count));
            frame
                .image
                .save(&path)
                .map_err(|e| AnalysisError::write(&path, e))?;
            ctx.report_progress(image_count, estimated.max(image_count));
        }

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        log::info!("extract: {} images from {}", image_count, name);
        summaries.push(ExtractSummary {
            file: name,
            duration: props.duration(),
            image_count,
        });
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::detect::ScriptedBackend;
    use crate::render::Renderer;
    use crate::video::{SyntheticBackend, SyntheticVideo};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn context(backend: &SyntheticBackend) -> AnalysisContext {
        AnalysisContext::new(
            AnalysisConfig::default(),
            Box::new(backend.clone()),
            Box::new(ScriptedBackend::new()),
        )
        .with_renderer(Renderer::without_text())
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn image_names_encode_position() {
        assert_eq!(frame_image_name(1, 3723.5, 2, 7), "01-01-02-03-02-00007.jpg");
    }

    #[test]
    fn extracts_at_requested_rate() {
        let backend = SyntheticBackend::new()
            .with_video("stub://cam/a.mp4", SyntheticVideo::new(10.0, 100))
            .with_video("stub://cam/b.mp4", SyntheticVideo::new(10.0, 50));
        let out = tempfile::tempdir().unwrap();
        let progress = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&progress);
        let mut ctx = context(&backend).with_progress(move |c, t| seen.borrow_mut().push((c, t)));
        let request = ExtractRequest {
            start_time: 2.0,
            duration: 2.0,
            frames_per_second: 2.0,
            max_images: 0,
        };
        let summaries = extract_frames(&mut ctx, Path::new("stub://cam"), out.path(), &request).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].image_count, 4);
        assert_eq!(summaries[0].duration, 10.0);
        assert_eq!(
            names(out.path())[..4],
            [
                "01-00-00-02-01-00001.jpg",
                "01-00-00-02-02-00002.jpg",
                "01-00-00-03-01-00003.jpg",
                "01-00-00-03-02-00004.jpg",
            ]
        );
        assert_eq!(progress.borrow()[..2], [(1, 4), (2, 4)]);
    }

    #[test]
    fn max_caps_each_recording() {
        let backend =
            SyntheticBackend::new().with_video("stub://cam/a.mp4", SyntheticVideo::new(10.0, 100));
        let out = tempfile::tempdir().unwrap();
        let mut ctx = context(&backend);
        let request = ExtractRequest {
            start_time: 0.0,
            duration: 0.0,
            frames_per_second: 1.0,
            max_images: 3,
        };
        let summaries = extract_frames(&mut ctx, Path::new("stub://cam"), out.path(), &request).unwrap();
        assert_eq!(summaries[0].image_count, 3);
        assert_eq!(names(out.path()).len(), 3);
    }

    #[test]
    fn start_past_any_recording_is_out_of_range() {
        let backend = SyntheticBackend::new()
            .with_video("stub://cam/a.mp4", SyntheticVideo::new(10.0, 100))
            .with_video("stub://cam/b.mp4", SyntheticVideo::new(10.0, 30));
        let out = tempfile::tempdir().unwrap();
        let mut ctx = context(&backend);
        let request = ExtractRequest {
            start_time: 5.0,
            duration: 0.0,
            frames_per_second: 1.0,
            max_images: 0,
        };
        let err = extract_frames(&mut ctx, Path::new("stub://cam"), out.path(), &request).unwrap_err();
        assert!(matches!(err, AnalysisError::OutOfRange { .. }));
    }
}
