//! Footage Kernel
//!
//! Object-detection analyses over recorded video.
//!
//! # Architecture
//!
//! Every analysis is a pipeline over a seekable, finite recording:
//!
//! 1. **Sample**: `FrameSampler` yields `(timestamp, frame)` pairs at a fixed
//!    cadence, by frame stride or by time stride.
//! 2. **Detect**: `DetectionAdapter` runs the injected `DetectorBackend` on a
//!    frame and normalizes its output into `Detection` records.
//! 3. **Analyze**: one of
//!    - size ranking of the vehicles in a single frame (`size_rank`)
//!    - vehicles closest to a reference vehicle over time (`proximity`)
//!    - the moment a tracked object goes missing (`loss`, `batch`)
//!    - frames or still images showing a labelled object (`search`)
//! 4. **Extract**: `clip` copies a window of the recording to a new file with
//!    burned-in overlays.
//!
//! Nothing is global. An `AnalysisContext` carries the configuration, the
//! video backend, the detector and an optional progress callback.
//!
//! # Module Structure
//!
//! - `video`: I/O boundary traits with synthetic and FFmpeg backends
//! - `detect`: detector boundary, normalization, COCO labels
//! - `render`: boxes, labels and legends drawn into frames
//! - `config`: file and environment configuration

pub mod batch;
pub mod clip;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod extract;
pub mod loss;
pub mod proximity;
pub mod render;
pub mod sampler;
pub mod search;
pub mod size_rank;
pub mod video;

pub use batch::{detect_object_loss, first_positive, summarize_dir};
pub use clip::{extract_clip, ClipOutput, ClipSpec};
pub use config::AnalysisConfig;
pub use context::{AnalysisContext, ProgressFn};
pub use detect::{
    BoundingBox, Detection, DetectionAdapter, DetectionFilter, DetectorBackend, Device,
    Prediction, ScriptedBackend,
};
pub use error::{AnalysisError, AnalysisResult};
pub use extract::{extract_frames, ExtractRequest, ExtractSummary};
pub use loss::{detect_loss_time, LossPhase, LossReport, LossState, LossTracker};
pub use proximity::{
    rank_proximity, GridIdentity, IdentityKey, ProximityHit, ProximityTracker, PseudoIdentity,
};
pub use render::{Overlay, Renderer};
pub use sampler::{Cadence, FrameSampler, SampledFrame};
pub use search::{find_objects, find_objects_in_images, ImageMatch, SearchHit, SearchOutcome};
pub use size_rank::{annotate_vehicles, RankedVehicle, SizeCategory, SizeRanking};
pub use video::{
    CodecTag, Frame, SyntheticBackend, SyntheticVideo, VideoBackend, VideoProperties, VideoSink,
    VideoSource, VideoSummary,
};
