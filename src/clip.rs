//! Clip extraction with burned-in overlays.
//!
//! A clip re-opens its source, so extraction never disturbs a sampler that is
//! still walking the same recording. The writer uses the source's frame rate
//! and size and the configured codec tag; if that encoder is unavailable the
//! clip fails rather than falling back to another codec.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::context::{ensure_dir, AnalysisContext};
use crate::error::{AnalysisError, AnalysisResult};
use crate::render::Overlay;

/// Window of one recording to copy, with overlays drawn on every frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipSpec {
    pub source: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub overlays: Vec<Overlay>,
}

impl ClipSpec {
    pub fn new(source: impl Into<PathBuf>, start_time: f64, end_time: f64) -> Self {
        Self {
            source: source.into(),
            start_time,
            end_time,
            overlays: Vec::new(),
        }
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlays.push(overlay);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClipOutput {
    pub path: PathBuf,
    pub frames_written: u64,
}

/// `{prefix}_{index}_{role}_{unix seconds}.mp4`
pub fn clip_file_name(prefix: &str, index: usize, role: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{prefix}_{index}_{role}_{timestamp}.mp4")
}

/// Writes the frames of `spec` to `output`.
///
/// The window is `[floor(start * fps), floor(end * fps))` in frames, with
/// `end` clamped to the recording. A start at or past the end of the
/// recording is `OutOfRange`; a window that is empty after clamping is
/// `InvalidWindow`. A read failure stops the clip early without error, but a
/// clip that received no frames at all is removed and reported as `Write`.
pub fn extract_clip(
    ctx: &mut AnalysisContext,
    spec: &ClipSpec,
    output: &Path,
) -> AnalysisResult<ClipOutput> {
    let mut source = ctx.video().open(&spec.source)?;
    let props = source.properties();
    let start_time = spec.start_time.max(0.0);
    props.check_start(start_time)?;
    let end_time = spec.end_time.min(props.duration());
    let start_frame = props.frame_at(start_time);
    let end_frame = props.frame_at(end_time).min(props.frame_count);
    if end_frame <= start_frame {
        return Err(AnalysisError::InvalidWindow {
            start: spec.start_time,
            end: spec.end_time,
        });
    }

    source.seek_frame(start_frame)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let codec = ctx.config.codec;
    // Encoders may create the file before failing to open.
    let mut sink = ctx
        .video()
        .create_writer(output, codec, props.fps, props.width, props.height)
        .inspect_err(|_| remove_output(output))?;

    let total = end_frame - start_frame;
    let mut written = 0u64;
    for index in start_frame..end_frame {
        let mut frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                log::warn!("clip: stopping at frame {} of {}: {}", index, spec.source.display(), e);
                break;
            }
        };
        ctx.renderer().draw_overlays(&mut frame.image, &spec.overlays);
        if let Err(e) = sink.write(&frame.image) {
            drop(sink);
            remove_output(output);
            return Err(e);
        }
        written += 1;
        ctx.report_progress(written, total);
    }
    if let Err(e) = sink.finish() {
        remove_output(output);
        return Err(e);
    }

    if written == 0 {
        remove_output(output);
        return Err(AnalysisError::write(output, "no frames were written"));
    }
    log::info!(
        "clip: wrote {} frames [{:.2}s, {:.2}s] of {} to {}",
        written,
        start_time,
        end_time,
        spec.source.display(),
        output.display()
    );
    Ok(ClipOutput {
        path: output.to_path_buf(),
        frames_written: written,
    })
}

fn remove_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::warn!("clip: removed incomplete output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("clip: failed to remove {}: {}", path.display(), e),
    }
}
