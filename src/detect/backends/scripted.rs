use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectorBackend, Device};
use crate::detect::result::Prediction;
use crate::video::Frame;

/// Deterministic backend replaying predictions keyed by frame index.
///
/// Frames without a script entry yield no predictions. The class filter is
/// honored the way a model's class restriction would be.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    script: BTreeMap<u64, Vec<Prediction>>,
    failing: HashSet<u64>,
    devices: Vec<Device>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `predictions` to frame `index`.
    pub fn at_frame(mut self, index: u64, predictions: Vec<Prediction>) -> Self {
        self.script.entry(index).or_default().extend(predictions);
        self
    }

    /// Add `prediction` to every frame in `frames`.
    pub fn over_frames(mut self, frames: Range<u64>, prediction: Prediction) -> Self {
        for index in frames {
            self.script
                .entry(index)
                .or_default()
                .push(prediction.clone());
        }
        self
    }

    /// Devices to report as available. CPU only when unset.
    pub fn supporting(mut self, devices: &[Device]) -> Self {
        self.devices = devices.to_vec();
        self
    }

    /// Make inference fail on frame `index`.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.failing.insert(index);
        self
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn devices(&self) -> Vec<Device> {
        if self.devices.is_empty() {
            vec![Device::Cpu]
        } else {
            self.devices.clone()
        }
    }

    fn predict(
        &mut self,
        frame: &Frame,
        class_filter: Option<&[u32]>,
        _device: Device,
    ) -> Result<Vec<Prediction>> {
        if self.failing.contains(&frame.index) {
            return Err(anyhow!("scripted failure at frame {}", frame.index));
        }
        let predictions = self
            .script
            .get(&frame.index)
            .map(|preds| {
                preds
                    .iter()
                    .filter(|p| class_filter.map_or(true, |ids| ids.contains(&p.class_id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(predictions)
    }
}
