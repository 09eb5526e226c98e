//! Frame sampling over an opened recording.
//!
//! A `FrameSampler` owns its source and yields `(timestamp, frame)` pairs
//! lazily, starting at a requested time and advancing by a fixed cadence until
//! the recording ends. It cannot be rewound: restart by opening the recording
//! again. A read failure ends the sequence early; everything yielded before
//! it remains valid.

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::video::{Frame, VideoProperties, VideoSource};

/// How the sampler advances between samples.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Cadence {
    /// Advance `round(fps * interval_secs)` frames using frame-index seeks.
    FrameStride { interval_secs: f64 },
    /// Advance `interval_secs * 1000` milliseconds using millisecond seeks,
    /// re-deriving the frame index from each decoded frame. A seek that lands
    /// on a frame already sampled yields nothing for that step.
    TimeStride { interval_secs: f64 },
    /// Advance a fixed number of frames.
    EveryNthFrame { frames: u64 },
}

impl Cadence {
    /// One sample per second of footage.
    pub const PER_SECOND: Cadence = Cadence::TimeStride { interval_secs: 1.0 };

    pub fn validate(&self) -> AnalysisResult<()> {
        match *self {
            Cadence::FrameStride { interval_secs } | Cadence::TimeStride { interval_secs } => {
                if !(interval_secs.is_finite() && interval_secs > 0.0) {
                    return Err(AnalysisError::config(format!(
                        "sample interval must be positive, got {interval_secs}"
                    )));
                }
            }
            Cadence::EveryNthFrame { frames } => {
                if frames == 0 {
                    return Err(AnalysisError::config("frame stride must be at least 1"));
                }
            }
        }
        Ok(())
    }

    fn frame_step(&self, fps: f64) -> u64 {
        match *self {
            Cadence::FrameStride { interval_secs } => ((fps * interval_secs).round() as u64).max(1),
            Cadence::EveryNthFrame { frames } => frames.max(1),
            Cadence::TimeStride { .. } => 1,
        }
    }
}

/// One sampled frame.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    /// Seconds from the start of the recording.
    pub timestamp: f64,
    pub frame: Frame,
}

#[derive(Clone, Copy)]
enum Cursor {
    Frame(u64),
    Millis(u64),
}

/// Lazy, finite sequence of sampled frames.
pub struct FrameSampler {
    source: Box<dyn VideoSource>,
    props: VideoProperties,
    cadence: Cadence,
    cursor: Cursor,
    last_index: Option<u64>,
    done: bool,
    yielded: u64,
}

impl FrameSampler {
    /// Start sampling `source` at `start_time` seconds.
    ///
    /// Fails with `OutOfRange` when `start_time` is at or beyond the end.
    pub fn new(
        source: Box<dyn VideoSource>,
        start_time: f64,
        cadence: Cadence,
    ) -> AnalysisResult<Self> {
        cadence.validate()?;
        let props = source.properties();
        props.check_start(start_time)?;
        let cursor = match cadence {
            Cadence::TimeStride { .. } => Cursor::Millis((start_time.max(0.0) * 1000.0).round() as u64),
            _ => Cursor::Frame(props.frame_at(start_time)),
        };
        Ok(Self {
            source,
            props,
            cadence,
            cursor,
            last_index: None,
            done: false,
            yielded: 0,
        })
    }

    pub fn properties(&self) -> VideoProperties {
        self.props
    }

    /// Samples produced so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Upper bound on the number of samples from the current position.
    pub fn estimated_total(&self) -> u64 {
        let remaining_frames = match self.cursor {
            Cursor::Frame(index) => self.props.frame_count.saturating_sub(index),
            Cursor::Millis(ms) => self
                .props
                .frame_count
                .saturating_sub(self.props.frame_at(ms as f64 / 1000.0)),
        };
        let step = match self.cadence {
            Cadence::TimeStride { interval_secs } => {
                ((self.props.fps * interval_secs).round() as u64).max(1)
            }
            cadence => cadence.frame_step(self.props.fps),
        };
        self.yielded + remaining_frames.div_ceil(step)
    }

    fn end(&mut self, reason: &str) -> Option<SampledFrame> {
        if !self.done {
            log::debug!(
                "FrameSampler: {} ended after {} samples ({})",
                self.source.path().display(),
                self.yielded,
                reason
            );
        }
        self.done = true;
        None
    }

    fn read_at_frame(&mut self, index: u64) -> Option<SampledFrame> {
        if index >= self.props.frame_count {
            return self.end("end of video");
        }
        if let Err(e) = self.source.seek_frame(index) {
            log::warn!("FrameSampler: seek to frame {} failed: {}", index, e);
            return self.end("seek failure");
        }
        let frame = self.read_frame()?;
        self.cursor = Cursor::Frame(index + self.cadence.frame_step(self.props.fps));
        Some(self.emit(frame))
    }

    /// Seeks to `millis`, advancing by the interval past any seek that lands
    /// on a frame at or before the last one sampled.
    fn read_at_millis(&mut self, mut millis: u64, interval_secs: f64) -> Option<SampledFrame> {
        let duration_ms = (self.props.duration() * 1000.0) as u64;
        let step_ms = ((interval_secs * 1000.0).round() as u64).max(1);
        loop {
            if millis >= duration_ms {
                return self.end("end of video");
            }
            if let Err(e) = self.source.seek_millis(millis) {
                log::warn!("FrameSampler: seek to {}ms failed: {}", millis, e);
                return self.end("seek failure");
            }
            let frame = self.read_frame()?;
            millis += step_ms;
            self.cursor = Cursor::Millis(millis);
            if self.last_index.is_some_and(|last| frame.index <= last) {
                log::debug!(
                    "FrameSampler: seek to {}ms returned already sampled frame {}, skipping",
                    millis - step_ms,
                    frame.index
                );
                continue;
            }
            return Some(self.emit(frame));
        }
    }

    fn read_frame(&mut self) -> Option<Frame> {
        match self.source.read() {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                self.end("end of stream");
                None
            }
            Err(e) => {
                log::warn!("FrameSampler: read failed, ending early: {}", e);
                self.end("read failure");
                None
            }
        }
    }

    fn emit(&mut self, frame: Frame) -> SampledFrame {
        self.last_index = Some(frame.index);
        self.yielded += 1;
        SampledFrame {
            timestamp: self.props.timestamp_of(frame.index),
            frame,
        }
    }
}

impl Iterator for FrameSampler {
    type Item = SampledFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match (self.cursor, self.cadence) {
            (Cursor::Frame(index), _) => self.read_at_frame(index),
            (Cursor::Millis(ms), Cadence::TimeStride { interval_secs }) => {
                self.read_at_millis(ms, interval_secs)
            }
            (Cursor::Millis(_), _) => self.end("cadence mismatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{SyntheticBackend, SyntheticVideo, VideoBackend};
    use std::path::Path;

    fn open(video: SyntheticVideo) -> Box<dyn VideoSource> {
        let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video);
        backend.open(Path::new("stub://cam/a.mp4")).unwrap()
    }

    #[test]
    fn frame_stride_advances_by_rounded_fps() {
        let source = open(SyntheticVideo::new(29.97, 300));
        let sampler =
            FrameSampler::new(source, 0.0, Cadence::FrameStride { interval_secs: 1.0 }).unwrap();
        let indices: Vec<u64> = sampler.map(|s| s.frame.index).collect();
        assert_eq!(indices, (0..300).step_by(30).collect::<Vec<_>>());
    }

    #[test]
    fn time_stride_samples_once_per_second() {
        let source = open(SyntheticVideo::new(30.0, 300));
        let sampler = FrameSampler::new(source, 2.0, Cadence::PER_SECOND).unwrap();
        let stamps: Vec<f64> = sampler.map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn time_stride_timestamps_follow_decoded_frames() {
        let source = open(SyntheticVideo::new(10.0, 50).with_seek_drift(3));
        let samples: Vec<SampledFrame> = FrameSampler::new(source, 0.0, Cadence::PER_SECOND)
            .unwrap()
            .collect();
        let indices: Vec<u64> = samples.iter().map(|s| s.frame.index).collect();
        assert_eq!(indices, vec![0, 7, 17, 27, 37]);
        for sample in &samples {
            assert_eq!(sample.timestamp, sample.frame.index as f64 / 10.0);
        }
    }

    #[test]
    fn time_stride_skips_frames_already_sampled() {
        let source = open(SyntheticVideo::new(10.0, 50).with_seek_drift(12));
        let mut sampler = FrameSampler::new(source, 0.0, Cadence::PER_SECOND).unwrap();
        let indices: Vec<u64> = sampler.by_ref().map(|s| s.frame.index).collect();
        assert_eq!(indices, vec![0, 8, 18, 28]);
        assert_eq!(sampler.yielded(), 4);
    }

    #[test]
    fn start_at_duration_is_out_of_range() {
        let source = open(SyntheticVideo::new(10.0, 100));
        let err = FrameSampler::new(source, 10.0, Cadence::PER_SECOND).err().unwrap();
        assert!(matches!(err, AnalysisError::OutOfRange { .. }));
    }

    #[test]
    fn read_failure_ends_sequence_with_partial_results() {
        let source = open(SyntheticVideo::new(1.0, 20).failing_from(5));
        let sampler = FrameSampler::new(source, 0.0, Cadence::EveryNthFrame { frames: 2 }).unwrap();
        let indices: Vec<u64> = sampler.map(|s| s.frame.index).collect();
        assert_eq!(indices, vec![0, 2, 4]);
    }

    #[test]
    fn estimated_total_counts_remaining_samples() {
        let source = open(SyntheticVideo::new(30.0, 300));
        let sampler = FrameSampler::new(source, 0.0, Cadence::PER_SECOND).unwrap();
        assert_eq!(sampler.estimated_total(), 10);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let source = open(SyntheticVideo::new(30.0, 300));
        let err = FrameSampler::new(source, 0.0, Cadence::TimeStride { interval_secs: 0.0 })
            .err()
            .unwrap();
        assert!(matches!(err, AnalysisError::Config(_)));
    }
}
