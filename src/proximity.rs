//! Ranking of the vehicles that came closest to a reference vehicle.
//!
//! Each sample, every detected vehicle is keyed by an `IdentityKey` and its
//! center distance to the reference box is recorded. Only the closest record
//! per identity is kept. The closest identities get an evidence clip centered
//! on the moment of closest approach.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::clip::{clip_file_name, extract_clip, ClipSpec};
use crate::config::ProximitySettings;
use crate::context::AnalysisContext;
use crate::detect::{BoundingBox, Detection, DetectionFilter};
use crate::error::AnalysisResult;
use crate::render::{Overlay, BLUE, RED};
use crate::sampler::FrameSampler;

/// Assigns detections to identities across samples.
pub trait IdentityKey {
    type Key: Clone + Debug + Eq + Hash;

    fn key(&self, detection: &Detection) -> Self::Key;
}

/// Position bucket used as a stand-in for a tracker id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PseudoIdentity {
    pub cell_x: i64,
    pub cell_y: i64,
    pub class_id: u32,
}

/// Keys a detection by its center on a square grid plus its class.
///
/// There is no motion model: a vehicle that moves to another cell becomes a
/// different identity.
#[derive(Clone, Copy, Debug)]
pub struct GridIdentity {
    pub cell_size: f64,
}

impl Default for GridIdentity {
    fn default() -> Self {
        Self { cell_size: 10.0 }
    }
}

impl IdentityKey for GridIdentity {
    type Key = PseudoIdentity;

    fn key(&self, detection: &Detection) -> PseudoIdentity {
        let (cx, cy) = detection.bbox.center();
        PseudoIdentity {
            cell_x: (cx / self.cell_size).floor() as i64,
            cell_y: (cy / self.cell_size).floor() as i64,
            class_id: detection.class_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DistanceRecord<K> {
    pub identity: K,
    pub distance: f64,
    pub timestamp: f64,
    pub bbox: BoundingBox,
}

/// Minimum distance to a reference box per identity.
pub struct ProximityTracker<I: IdentityKey> {
    identity: I,
    reference: BoundingBox,
    records: Vec<DistanceRecord<I::Key>>,
    slots: HashMap<I::Key, usize>,
}

impl<I: IdentityKey> ProximityTracker<I> {
    pub fn new(identity: I, reference: BoundingBox) -> Self {
        Self {
            identity,
            reference,
            records: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// Records every detection of one sample. Only a strictly smaller
    /// distance replaces an identity's record.
    pub fn observe(&mut self, timestamp: f64, detections: &[Detection]) {
        for detection in detections {
            let key = self.identity.key(detection);
            let record = DistanceRecord {
                identity: key.clone(),
                distance: detection.bbox.center_distance(&self.reference),
                timestamp,
                bbox: detection.bbox,
            };
            match self.slots.get(&key) {
                Some(&slot) => {
                    if record.distance < self.records[slot].distance {
                        self.records[slot] = record;
                    }
                }
                None => {
                    self.slots.insert(key, self.records.len());
                    self.records.push(record);
                }
            }
        }
    }

    pub fn identities(&self) -> usize {
        self.records.len()
    }

    /// The `top_k` closest identities, nearest first. Ties keep the order in
    /// which identities were first seen.
    pub fn ranked(&self, top_k: usize) -> Vec<DistanceRecord<I::Key>> {
        let mut ranked = self.records.clone();
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        ranked.truncate(top_k);
        ranked
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProximityHit {
    pub distance: f64,
    pub seconds: f64,
    pub footage_file_name: PathBuf,
}

/// Scans `video` from `start_time` for vehicles approaching `reference` and
/// writes one clip per closest vehicle.
///
/// Progress is reported per sample; clip writing is not reported.
pub fn rank_proximity(
    ctx: &mut AnalysisContext,
    video: &Path,
    reference: BoundingBox,
    start_time: f64,
) -> AnalysisResult<Vec<ProximityHit>> {
    rank_proximity_with(ctx, video, reference, start_time, GridIdentity::default())
}

pub fn rank_proximity_with<I: IdentityKey>(
    ctx: &mut AnalysisContext,
    video: &Path,
    reference: BoundingBox,
    start_time: f64,
    identity: I,
) -> AnalysisResult<Vec<ProximityHit>> {
    let settings = ctx.config.proximity.clone();
    let source = ctx.video().open(video)?;
    let mut sampler = FrameSampler::new(source, start_time, settings.cadence)?;
    let duration = sampler.properties().duration();
    let filter = DetectionFilter::classes(&settings.class_ids);
    let mut tracker = ProximityTracker::new(identity, reference);

    while let Some(sample) = sampler.next() {
        let detections = ctx.detector().detect(&sample.frame, &filter)?;
        tracker.observe(sample.timestamp, &detections);
        ctx.report_progress(sampler.yielded(), sampler.estimated_total());
    }
    log::info!(
        "proximity: {} samples of {}, {} identities",
        sampler.yielded(),
        video.display(),
        tracker.identities()
    );

    let records = tracker.ranked(settings.top_k);
    // Progress counts samples only; clip frames are not reported.
    let progress = ctx.take_progress();
    let hits = write_clips(ctx, video, reference, duration, &settings, records);
    ctx.set_progress(progress);
    hits
}

fn write_clips<K: Debug>(
    ctx: &mut AnalysisContext,
    video: &Path,
    reference: BoundingBox,
    duration: f64,
    settings: &ProximitySettings,
    records: Vec<DistanceRecord<K>>,
) -> AnalysisResult<Vec<ProximityHit>> {
    let mut hits = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        let index = i + 1;
        let start = (record.timestamp - settings.clip_half_window_secs).max(0.0);
        let end = (record.timestamp + settings.clip_half_window_secs).min(duration);
        let spec = ClipSpec::new(video, start, end)
            .with_overlay(Overlay::new(reference, "Target", RED))
            .with_overlay(Overlay::new(record.bbox, format!("Proximity {index}"), BLUE));
        let output = ctx.output_path(&clip_file_name("vehicle", index, "proximity"))?;
        let clip = extract_clip(ctx, &spec, &output)?;
        log::debug!(
            "proximity: #{} {:?} at {:.2}s, distance {:.1}px",
            index,
            record.identity,
            record.timestamp,
            record.distance
        );
        hits.push(ProximityHit {
            distance: record.distance,
            seconds: record.timestamp,
            footage_file_name: clip.path,
        });
    }
    Ok(hits)
}
