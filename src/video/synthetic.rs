//! In-memory recordings for tests and demos.
//!
//! Recordings are registered under arbitrary paths (by convention
//! `stub://<dir>/<name>.mp4`) and decode to small solid-color frames whose red
//! channel encodes the frame index. Writers produce a real file on disk with
//! one byte per frame so output handling (directory creation, empty-file
//! cleanup) is exercised end to end.
//!
//! The backend records which recordings were opened and how many frames each
//! writer received, so callers can assert on scan order and clip length.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use image::{Rgb, RgbImage};

use super::{CodecTag, Frame, VideoBackend, VideoProperties, VideoSink, VideoSource};
use crate::error::{AnalysisError, AnalysisResult};

/// Shape of one synthetic recording.
#[derive(Clone, Debug)]
pub struct SyntheticVideo {
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    /// Reads at or past this index fail, simulating a truncated file.
    pub fail_from_frame: Option<u64>,
    /// Every seek fails.
    pub fail_seek: bool,
    /// Millisecond seeks land this many frames before the target, as a
    /// container snapping to an earlier keyframe would.
    pub seek_drift_frames: u64,
}

impl SyntheticVideo {
    pub fn new(fps: f64, frame_count: u64) -> Self {
        Self {
            fps,
            frame_count,
            width: 64,
            height: 48,
            fail_from_frame: None,
            fail_seek: false,
            seek_drift_frames: 0,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn failing_from(mut self, frame: u64) -> Self {
        self.fail_from_frame = Some(frame);
        self
    }

    pub fn failing_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    pub fn with_seek_drift(mut self, frames: u64) -> Self {
        self.seek_drift_frames = frames;
        self
    }

    fn properties(&self) -> VideoProperties {
        VideoProperties {
            fps: self.fps,
            frame_count: self.frame_count,
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Default)]
struct SyntheticState {
    videos: BTreeMap<PathBuf, SyntheticVideo>,
    opened: Vec<PathBuf>,
    written: HashMap<PathBuf, u64>,
    rejected_codecs: HashSet<CodecTag>,
    half_open_codecs: HashSet<CodecTag>,
}

/// Backend serving registered in-memory recordings.
#[derive(Clone, Default)]
pub struct SyntheticBackend {
    state: Rc<RefCell<SyntheticState>>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(self, path: impl Into<PathBuf>, video: SyntheticVideo) -> Self {
        self.add_video(path, video);
        self
    }

    pub fn add_video(&self, path: impl Into<PathBuf>, video: SyntheticVideo) {
        self.state.borrow_mut().videos.insert(path.into(), video);
    }

    /// Make `create_writer` fail for `codec`, as an encoder without that codec would.
    pub fn reject_codec(&self, codec: CodecTag) {
        self.state.borrow_mut().rejected_codecs.insert(codec);
    }

    /// Make `create_writer` create the output file for `codec` and then fail,
    /// as an encoder that opens the container before the codec would.
    pub fn fail_writer_after_create(&self, codec: CodecTag) {
        self.state.borrow_mut().half_open_codecs.insert(codec);
    }

    /// Paths opened so far, in order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.state.borrow().opened.clone()
    }

    /// Frames written to `path` by the last writer created for it.
    pub fn frames_written(&self, path: &Path) -> Option<u64> {
        self.state.borrow().written.get(path).copied()
    }

    /// Registered recordings directly under `dir`, sorted by file name.
    pub fn list_dir(&self, dir: &Path) -> Vec<PathBuf> {
        let state = self.state.borrow();
        let mut files: Vec<PathBuf> = state
            .videos
            .keys()
            .filter(|path| path.parent() == Some(dir) && super::is_video_file(path))
            .cloned()
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        files
    }
}

impl VideoBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, path: &Path) -> AnalysisResult<Box<dyn VideoSource>> {
        let mut state = self.state.borrow_mut();
        let video = state
            .videos
            .get(path)
            .cloned()
            .ok_or_else(|| AnalysisError::io(path, "no synthetic recording registered"))?;
        state.opened.push(path.to_path_buf());
        log::debug!(
            "SyntheticBackend: opened {} ({} frames @ {} fps)",
            path.display(),
            video.frame_count,
            video.fps
        );
        Ok(Box::new(SyntheticSource {
            path: path.to_path_buf(),
            video,
            cursor: 0,
        }))
    }

    fn list_videos(&self, dir: &Path) -> AnalysisResult<Vec<PathBuf>> {
        Ok(self.list_dir(dir))
    }

    fn create_writer(
        &self,
        path: &Path,
        codec: CodecTag,
        _fps: f64,
        width: u32,
        height: u32,
    ) -> AnalysisResult<Box<dyn VideoSink>> {
        if self.state.borrow().rejected_codecs.contains(&codec) {
            return Err(AnalysisError::write(
                path,
                format!("encoder for codec '{codec}' is not available"),
            ));
        }
        let file = File::create(path).map_err(|e| AnalysisError::write(path, e))?;
        if self.state.borrow().half_open_codecs.contains(&codec) {
            return Err(AnalysisError::write(
                path,
                format!("encoder for codec '{codec}' failed to open"),
            ));
        }
        self.state
            .borrow_mut()
            .written
            .insert(path.to_path_buf(), 0);
        Ok(Box::new(SyntheticSink {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            width,
            height,
            state: Rc::clone(&self.state),
        }))
    }
}

struct SyntheticSource {
    path: PathBuf,
    video: SyntheticVideo,
    cursor: u64,
}

impl SyntheticSource {
    fn check_seek(&self) -> AnalysisResult<()> {
        if self.video.fail_seek {
            return Err(AnalysisError::io(&self.path, "seek failed"));
        }
        Ok(())
    }
}

impl VideoSource for SyntheticSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn properties(&self) -> VideoProperties {
        self.video.properties()
    }

    fn seek_frame(&mut self, index: u64) -> AnalysisResult<()> {
        self.check_seek()?;
        self.cursor = index;
        Ok(())
    }

    fn seek_millis(&mut self, millis: u64) -> AnalysisResult<()> {
        self.check_seek()?;
        // First frame whose presentation time is at or after the target.
        let exact = millis as f64 * self.video.fps / 1000.0;
        let landed = (exact - 1e-6).ceil().max(0.0) as u64;
        self.cursor = landed.saturating_sub(self.video.seek_drift_frames);
        Ok(())
    }

    fn read(&mut self) -> AnalysisResult<Option<Frame>> {
        if self.cursor >= self.video.frame_count {
            return Ok(None);
        }
        if let Some(limit) = self.video.fail_from_frame {
            if self.cursor >= limit {
                return Err(AnalysisError::io(
                    &self.path,
                    format!("decode failed at frame {}", self.cursor),
                ));
            }
        }
        let index = self.cursor;
        self.cursor += 1;
        let shade = (index % 256) as u8;
        let image = RgbImage::from_pixel(self.video.width, self.video.height, Rgb([shade, 0, 0]));
        Ok(Some(Frame { index, image }))
    }
}

struct SyntheticSink {
    path: PathBuf,
    out: BufWriter<File>,
    width: u32,
    height: u32,
    state: Rc<RefCell<SyntheticState>>,
}

impl VideoSink for SyntheticSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, image: &RgbImage) -> AnalysisResult<()> {
        if image.width() != self.width || image.height() != self.height {
            return Err(AnalysisError::write(
                &self.path,
                format!(
                    "frame size {}x{} does not match writer {}x{}",
                    image.width(),
                    image.height(),
                    self.width,
                    self.height
                ),
            ));
        }
        let marker = image.get_pixel(0, 0)[0];
        self.out
            .write_all(&[marker])
            .map_err(|e| AnalysisError::write(&self.path, e))?;
        if let Some(count) = self.state.borrow_mut().written.get_mut(&self.path) {
            *count += 1;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> AnalysisResult<()> {
        self.out
            .flush()
            .map_err(|e| AnalysisError::write(&self.path, e))
    }
}
