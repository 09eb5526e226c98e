//! Video I/O boundary.
//!
//! Analysis code never talks to a container library directly. It goes through
//! three traits:
//! - `VideoBackend`: opens sources and creates writers for a path
//! - `VideoSource`: container properties, seek by frame or millisecond, read
//! - `VideoSink`: an opened encoder that accepts RGB frames
//!
//! Two backends exist:
//! - `synthetic`: in-memory `stub://` recordings for tests and demos
//! - `ffmpeg`: local files decoded/encoded with FFmpeg (feature: video-ffmpeg)
//!
//! Handles are scoped: dropping a source or sink releases it, so early returns
//! and `?` never leak decoder or encoder state.

#[cfg(feature = "video-ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::RgbImage;
use serde::Serialize;

use crate::error::{AnalysisError, AnalysisResult};

pub use synthetic::{SyntheticBackend, SyntheticVideo};

/// File extensions treated as candidate recordings.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// One decoded frame with its position in the source.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Zero-based frame index in the source stream.
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Container metadata of an opened source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoProperties {
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl VideoProperties {
    /// Duration in seconds, `frame_count / fps`.
    pub fn duration(&self) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        self.frame_count as f64 / self.fps
    }

    pub fn timestamp_of(&self, frame_index: u64) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        frame_index as f64 / self.fps
    }

    /// Frame index at `seconds`, truncated.
    pub fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.fps) as u64
    }

    /// Rejects start times at or beyond the end of the recording.
    pub fn check_start(&self, start_time: f64) -> AnalysisResult<()> {
        let duration = self.duration();
        if start_time >= duration || self.frame_at(start_time) >= self.frame_count {
            return Err(AnalysisError::OutOfRange {
                requested: start_time,
                duration,
            });
        }
        Ok(())
    }
}

/// Opened, seekable recording.
pub trait VideoSource {
    fn path(&self) -> &Path;

    fn properties(&self) -> VideoProperties;

    /// Position the source so the next `read` returns frame `index`.
    fn seek_frame(&mut self, index: u64) -> AnalysisResult<()>;

    /// Position the source at `millis` from the start of the stream.
    ///
    /// Container seeking is approximate; callers re-derive the frame index
    /// from the frame returned by the next `read`.
    fn seek_millis(&mut self, millis: u64) -> AnalysisResult<()>;

    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    fn read(&mut self) -> AnalysisResult<Option<Frame>>;
}

/// Opened encoder writing one output file.
pub trait VideoSink {
    fn path(&self) -> &Path;

    fn write(&mut self, image: &RgbImage) -> AnalysisResult<()>;

    /// Flush the encoder and finalize the container.
    fn finish(self: Box<Self>) -> AnalysisResult<()>;
}

/// Factory for sources and sinks.
pub trait VideoBackend {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path) -> AnalysisResult<Box<dyn VideoSource>>;

    /// Candidate recordings in `dir`, sorted by file name.
    fn list_videos(&self, dir: &Path) -> AnalysisResult<Vec<PathBuf>> {
        list_video_files(dir)
    }

    fn create_writer(
        &self,
        path: &Path,
        codec: CodecTag,
        fps: f64,
        width: u32,
        height: u32,
    ) -> AnalysisResult<Box<dyn VideoSink>>;
}

/// Four character codec identifier (FourCC).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecTag([u8; 4]);

impl CodecTag {
    /// H.264 in an MP4 container.
    pub const AVC1: CodecTag = CodecTag(*b"avc1");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl Default for CodecTag {
    fn default() -> Self {
        Self::AVC1
    }
}

impl FromStr for CodecTag {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(AnalysisError::config(format!(
                "codec tag must be 4 printable ASCII characters, got '{s}'"
            )));
        }
        Ok(CodecTag([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Debug for CodecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodecTag({})", self.as_str())
    }
}

impl fmt::Display for CodecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a recording's container metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoSummary {
    pub file: String,
    pub fps: f64,
    pub total_frames: u64,
    /// Whole seconds.
    pub duration: u64,
    /// `"width, height"`.
    pub resolution: String,
}

impl VideoSummary {
    pub fn from_properties(file: impl Into<String>, props: &VideoProperties) -> Self {
        Self {
            file: file.into(),
            fps: props.fps,
            total_frames: props.frame_count,
            duration: props.duration() as u64,
            resolution: format!("{}, {}", props.width, props.height),
        }
    }
}

/// Lists candidate recordings on disk in `dir`, sorted by file name.
pub fn list_video_files(dir: &Path) -> AnalysisResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| AnalysisError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AnalysisError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && is_video_file(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)))
        .unwrap_or(false)
}

/// Reads container metadata for one recording. Recomputed on every call.
pub fn summarize(backend: &dyn VideoBackend, path: &Path) -> AnalysisResult<VideoSummary> {
    let source = backend.open(path)?;
    let props = source.properties();
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(VideoSummary::from_properties(file, &props))
}

/// Summaries for every recording in `files`, in order.
pub fn summarize_all(
    backend: &dyn VideoBackend,
    files: &[PathBuf],
) -> AnalysisResult<Vec<VideoSummary>> {
    files.iter().map(|path| summarize(backend, path)).collect()
}

/// Formats a position as `HH-MM-SS` for file names.
pub fn format_clock(seconds: f64, separator: char) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours:02}{separator}{minutes:02}{separator}{secs:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(fps: f64, frame_count: u64) -> VideoProperties {
        VideoProperties {
            fps,
            frame_count,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn duration_and_frame_mapping() {
        let p = props(30.0, 900);
        assert_eq!(p.duration(), 30.0);
        assert_eq!(p.frame_at(5.0), 150);
        assert_eq!(p.timestamp_of(45), 1.5);
    }

    #[test]
    fn start_beyond_duration_is_out_of_range() {
        let p = props(30.0, 900);
        assert!(p.check_start(29.9).is_ok());
        match p.check_start(30.0) {
            Err(AnalysisError::OutOfRange {
                requested,
                duration,
            }) => {
                assert_eq!(requested, 30.0);
                assert_eq!(duration, 30.0);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn codec_tag_requires_four_characters() {
        assert_eq!("avc1".parse::<CodecTag>().unwrap(), CodecTag::AVC1);
        assert!("h264x".parse::<CodecTag>().is_err());
        assert!("av1".parse::<CodecTag>().is_err());
    }

    #[test]
    fn summary_formats_resolution_and_whole_seconds() {
        let summary = VideoSummary::from_properties("a.mp4", &props(25.0, 1010));
        assert_eq!(summary.duration, 40);
        assert_eq!(summary.resolution, "64, 48");
    }

    #[test]
    fn lists_only_video_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.MOV", "notes.txt", "c.avi"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = list_video_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MOV", "b.mp4", "c.avi"]);
    }

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(3725.4, '-'), "01-02-05");
    }
}
