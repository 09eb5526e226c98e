//! Detection of the moment a tracked object leaves the scene.
//!
//! The object is identified by its label and a reference box: a sample
//! matches when any detection with that label overlaps the reference by more
//! than the IoU threshold. The object counts as lost once it has been missing
//! for at least the tolerance, and the reported time is when it first went
//! missing.
//!
//! ```text
//! VISIBLE --no match--> MISSING_PENDING --missing >= tolerance--> LOST
//!    ^                        |
//!    +--------match-----------+
//! ```
//! A scan that ends while VISIBLE or MISSING_PENDING reports no loss.

use std::path::Path;

use serde::Serialize;

use crate::context::AnalysisContext;
use crate::detect::{BoundingBox, Detection, DetectionFilter};
use crate::error::AnalysisResult;
use crate::sampler::FrameSampler;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LossPhase {
    Visible,
    MissingPending,
    Lost,
}

/// Tracker state after the last sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossState {
    pub currently_visible: bool,
    pub missing_since: Option<f64>,
    pub tentative_lost_time: Option<f64>,
}

impl Default for LossState {
    fn default() -> Self {
        Self {
            currently_visible: true,
            missing_since: None,
            tentative_lost_time: None,
        }
    }
}

pub struct LossTracker {
    target_label: String,
    reference: BoundingBox,
    iou_threshold: f64,
    tolerance_secs: f64,
    state: LossState,
    lost_time: Option<f64>,
}

impl LossTracker {
    pub fn new(
        target_label: impl Into<String>,
        reference: BoundingBox,
        iou_threshold: f64,
        tolerance_secs: f64,
    ) -> Self {
        Self {
            target_label: target_label.into(),
            reference,
            iou_threshold,
            tolerance_secs,
            state: LossState::default(),
            lost_time: None,
        }
    }

    pub fn state(&self) -> LossState {
        self.state
    }

    pub fn phase(&self) -> LossPhase {
        if self.lost_time.is_some() {
            LossPhase::Lost
        } else if self.state.currently_visible {
            LossPhase::Visible
        } else {
            LossPhase::MissingPending
        }
    }

    pub fn lost_time(&self) -> Option<f64> {
        self.lost_time
    }

    fn matches(&self, detections: &[Detection]) -> bool {
        detections.iter().any(|d| {
            d.label == self.target_label && d.bbox.iou(&self.reference) > self.iou_threshold
        })
    }

    /// Feeds one sample. Returns the lost time once the object is lost;
    /// later samples are ignored.
    pub fn observe(&mut self, timestamp: f64, detections: &[Detection]) -> Option<f64> {
        if self.lost_time.is_some() {
            return self.lost_time;
        }
        if self.matches(detections) {
            if !self.state.currently_visible {
                let since = self.state.missing_since.unwrap_or(timestamp);
                log::debug!(
                    "loss: '{}' reappeared at {:.2}s after {:.2}s missing, within tolerance",
                    self.target_label,
                    timestamp,
                    timestamp - since
                );
                self.state = LossState::default();
            }
            return None;
        }

        let since = match self.state.missing_since {
            Some(since) => since,
            None => {
                log::debug!("loss: '{}' missing from {:.2}s", self.target_label, timestamp);
                self.state = LossState {
                    currently_visible: false,
                    missing_since: Some(timestamp),
                    tentative_lost_time: Some(timestamp),
                };
                timestamp
            }
        };
        if timestamp - since >= self.tolerance_secs {
            self.lost_time = Some(since);
        }
        self.lost_time
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LossReport {
    pub file_name: String,
    pub lost_time: f64,
}

/// Scans one recording from its start. `None` when the object never stays
/// missing for the tolerance.
pub fn detect_loss_time(
    ctx: &mut AnalysisContext,
    video: &Path,
    target_label: &str,
    reference: BoundingBox,
) -> AnalysisResult<Option<f64>> {
    let settings = ctx.config.loss.clone();
    let source = ctx.video().open(video)?;
    let mut sampler = FrameSampler::new(source, 0.0, settings.cadence)?;
    let mut filter = DetectionFilter::label(target_label);
    if let Some(class_id) = ctx.detector().class_id(target_label) {
        filter.class_ids = Some(vec![class_id]);
    }
    let mut tracker = LossTracker::new(
        target_label,
        reference,
        settings.iou_threshold,
        settings.tolerance_secs,
    );

    while let Some(sample) = sampler.next() {
        let detections = ctx.detector().detect(&sample.frame, &filter)?;
        let lost = tracker.observe(sample.timestamp, &detections);
        ctx.report_progress(sampler.yielded(), sampler.estimated_total());
        if let Some(lost_time) = lost {
            log::info!(
                "loss: '{}' lost at {:.2}s in {}",
                target_label,
                lost_time,
                video.display()
            );
            return Ok(Some(lost_time));
        }
    }
    log::debug!(
        "loss: '{}' not lost in {} ({:?} after {} samples)",
        target_label,
        video.display(),
        tracker.phase(),
        sampler.yielded()
    );
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: BoundingBox = BoundingBox::new(100, 100, 200, 200);

    fn seen(label: &str, bbox: BoundingBox) -> Vec<Detection> {
        vec![Detection {
            label: label.to_string(),
            class_id: 26,
            confidence: 0.9,
            bbox,
        }]
    }

    fn run(tracker: &mut LossTracker, samples: &[(f64, bool)]) -> Option<f64> {
        for (t, present) in samples {
            let detections = if *present { seen("handbag", REFERENCE) } else { Vec::new() };
            if let Some(lost) = tracker.observe(*t, &detections) {
                return Some(lost);
            }
        }
        None
    }

    #[test]
    fn short_absence_is_forgiven() {
        let mut tracker = LossTracker::new("handbag", REFERENCE, 0.3, 5.0);
        let samples: Vec<(f64, bool)> = (0..30).map(|t| (t as f64, !(10..13).contains(&t))).collect();
        assert_eq!(run(&mut tracker, &samples), None);
        assert_eq!(tracker.phase(), LossPhase::Visible);
        assert_eq!(tracker.state(), LossState::default());
    }

    #[test]
    fn loss_reports_first_missing_time() {
        let mut tracker = LossTracker::new("handbag", REFERENCE, 0.3, 5.0);
        let samples: Vec<(f64, bool)> = (0..30).map(|t| (t as f64, t < 10)).collect();
        assert_eq!(run(&mut tracker, &samples), Some(10.0));
        assert_eq!(tracker.phase(), LossPhase::Lost);
    }

    #[test]
    fn pending_state_tracks_missing_since() {
        let mut tracker = LossTracker::new("handbag", REFERENCE, 0.3, 5.0);
        tracker.observe(0.0, &seen("handbag", REFERENCE));
        tracker.observe(1.0, &[]);
        tracker.observe(2.0, &[]);
        assert_eq!(tracker.phase(), LossPhase::MissingPending);
        assert_eq!(tracker.state().missing_since, Some(1.0));
        assert_eq!(tracker.state().tentative_lost_time, Some(1.0));
    }

    #[test]
    fn wrong_label_or_low_overlap_is_missing() {
        let mut tracker = LossTracker::new("handbag", REFERENCE, 0.3, 1.0);
        // IoU of a box shifted by 60px on a 100px box: 40*100 / 16000 = 0.25
        let shifted = BoundingBox::new(160, 100, 260, 200);
        assert_eq!(tracker.observe(0.0, &seen("handbag", shifted)), None);
        assert_eq!(tracker.observe(1.0, &seen("suitcase", REFERENCE)), Some(0.0));
    }

    #[test]
    fn lost_is_terminal() {
        let mut tracker = LossTracker::new("handbag", REFERENCE, 0.3, 2.0);
        assert_eq!(run(&mut tracker, &[(0.0, false), (2.0, false)]), Some(0.0));
        assert_eq!(tracker.observe(3.0, &seen("handbag", REFERENCE)), Some(0.0));
    }
}
