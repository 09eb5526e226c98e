//! Object detection boundary.
//!
//! A `DetectorBackend` turns one frame into raw predictions; the
//! `DetectionAdapter` resolves labels, normalizes boxes and applies the
//! caller's filter. Available backends:
//! - `scripted`: per-frame predictions fixed up front, for tests and demos
//! - `tract`: YOLOv8 ONNX model (feature: backend-tract)

mod adapter;
mod backend;
pub mod backends;
pub mod labels;
mod result;

pub use adapter::{DetectionAdapter, DetectionFilter};
pub use backend::{DetectorBackend, Device};
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, Prediction};
