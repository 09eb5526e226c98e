use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::labels::COCO_CLASSES;
use super::result::Prediction;
use crate::video::Frame;

/// Compute device hint forwarded to the detector on every call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    /// Device used when none is configured. Probing for accelerators is left
    /// to backends through `DetectorBackend::devices`; see `preferred`.
    pub fn auto() -> Self {
        Device::Cpu
    }

    /// Best of `available`: MPS, then CUDA, then CPU.
    pub fn preferred(available: &[Device]) -> Self {
        [Device::Mps, Device::Cuda]
            .into_iter()
            .find(|device| available.contains(device))
            .unwrap_or(Device::Cpu)
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "cuda:0" | "gpu" => Ok(Device::Cuda),
            "mps" => Ok(Device::Mps),
            other => Err(anyhow::anyhow!("unknown device '{}'", other)),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Mps => "mps",
        };
        f.write_str(name)
    }
}

/// Object detector boundary.
///
/// A backend is a pure function of the frame: implementations must not carry
/// state from one `predict` call into the next.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one frame.
    ///
    /// When `class_filter` is set, only predictions for those class ids are
    /// returned. Boxes are in frame pixel coordinates.
    fn predict(
        &mut self,
        frame: &Frame,
        class_filter: Option<&[u32]>,
        device: Device,
    ) -> Result<Vec<Prediction>>;

    /// Resolve a class id to its label name.
    fn label(&self, class_id: u32) -> Option<&str> {
        COCO_CLASSES.get(class_id as usize).copied()
    }

    /// Resolve a label name to its class id.
    fn class_id(&self, label: &str) -> Option<u32> {
        COCO_CLASSES
            .iter()
            .position(|name| *name == label)
            .map(|idx| idx as u32)
    }

    /// Devices this backend can run on in the current environment.
    fn devices(&self) -> Vec<Device> {
        vec![Device::Cpu]
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_names() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda:0".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("mps".parse::<Device>().unwrap(), Device::Mps);
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn preferred_device_order() {
        assert_eq!(Device::preferred(&[Device::Cpu, Device::Cuda, Device::Mps]), Device::Mps);
        assert_eq!(Device::preferred(&[Device::Cuda, Device::Cpu]), Device::Cuda);
        assert_eq!(Device::preferred(&[Device::Cpu]), Device::Cpu);
        assert_eq!(Device::preferred(&[]), Device::Cpu);
    }
}
