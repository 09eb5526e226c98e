use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::labels::{CAR, VEHICLE_CLASSES};
use crate::detect::Device;
use crate::sampler::Cadence;
use crate::video::CodecTag;

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_DETECTOR_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_DETECTOR_CONFIDENCE: f32 = 0.25;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_MAX_RANKED: usize = 6;
const DEFAULT_RANKED_IMAGE: &str = "annotated_frame.jpg";
const DEFAULT_TOP_K: usize = 3;
const DEFAULT_CLIP_HALF_WINDOW_SECS: f64 = 5.0;
const DEFAULT_LOSS_IOU: f64 = 0.3;
const DEFAULT_LOSS_TOLERANCE_SECS: f64 = 10.0;
const DEFAULT_SEARCH_STRIDE: u64 = 30;
const DEFAULT_SEARCH_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    output_dir: Option<PathBuf>,
    device: Option<String>,
    codec: Option<String>,
    font_path: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    size_rank: Option<SizeRankConfigFile>,
    proximity: Option<ProximityConfigFile>,
    loss: Option<LossConfigFile>,
    search: Option<SearchConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    nms_iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SizeRankConfigFile {
    class_ids: Option<Vec<u32>>,
    max_ranked: Option<usize>,
    image_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ProximityConfigFile {
    class_ids: Option<Vec<u32>>,
    top_k: Option<usize>,
    clip_half_window_secs: Option<f64>,
    sample_interval_secs: Option<f64>,
    cadence: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LossConfigFile {
    iou_threshold: Option<f64>,
    tolerance_secs: Option<f64>,
    sample_interval_secs: Option<f64>,
    cadence: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchConfigFile {
    sample_every_frames: Option<u64>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Directory receiving annotated images and clips. Created on demand.
    pub output_dir: PathBuf,
    pub device: Device,
    pub codec: CodecTag,
    pub font_path: Option<PathBuf>,
    pub detector: DetectorSettings,
    pub size_rank: SizeRankSettings,
    pub proximity: ProximitySettings,
    pub loss: LossSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub confidence: f32,
    pub nms_iou: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeRankSettings {
    pub class_ids: Vec<u32>,
    pub max_ranked: usize,
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProximitySettings {
    pub class_ids: Vec<u32>,
    pub top_k: usize,
    pub clip_half_window_secs: f64,
    pub cadence: Cadence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossSettings {
    pub iou_threshold: f64,
    pub tolerance_secs: f64,
    pub cadence: Cadence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub sample_every_frames: u64,
    pub min_confidence: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            device: Device::auto(),
            codec: CodecTag::default(),
            font_path: None,
            detector: DetectorSettings {
                backend: DEFAULT_DETECTOR_BACKEND.to_string(),
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                input_size: DEFAULT_INPUT_SIZE,
                confidence: DEFAULT_DETECTOR_CONFIDENCE,
                nms_iou: DEFAULT_NMS_IOU,
            },
            size_rank: SizeRankSettings {
                class_ids: vec![CAR],
                max_ranked: DEFAULT_MAX_RANKED,
                image_name: DEFAULT_RANKED_IMAGE.to_string(),
            },
            proximity: ProximitySettings {
                class_ids: VEHICLE_CLASSES.to_vec(),
                top_k: DEFAULT_TOP_K,
                clip_half_window_secs: DEFAULT_CLIP_HALF_WINDOW_SECS,
                cadence: Cadence::PER_SECOND,
            },
            loss: LossSettings {
                iou_threshold: DEFAULT_LOSS_IOU,
                tolerance_secs: DEFAULT_LOSS_TOLERANCE_SECS,
                cadence: Cadence::PER_SECOND,
            },
            search: SearchSettings {
                sample_every_frames: DEFAULT_SEARCH_STRIDE,
                min_confidence: DEFAULT_SEARCH_CONFIDENCE,
            },
        }
    }
}

impl AnalysisConfig {
    /// Defaults, then the file named by `FOOTAGE_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FOOTAGE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, reading the config file from `path` when given.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnalysisConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let device = match file.device.as_deref() {
            Some(device) => device.parse()?,
            None => defaults.device,
        };
        let codec = match file.codec.as_deref() {
            Some(codec) => codec.parse()?,
            None => defaults.codec,
        };
        let detector = file.detector.unwrap_or_default();
        let size_rank = file.size_rank.unwrap_or_default();
        let proximity = file.proximity.unwrap_or_default();
        let loss = file.loss.unwrap_or_default();
        let search = file.search.unwrap_or_default();
        Ok(Self {
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            device,
            codec,
            font_path: file.font_path,
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(defaults.detector.backend),
                model_path: detector.model_path.unwrap_or(defaults.detector.model_path),
                input_size: detector.input_size.unwrap_or(defaults.detector.input_size),
                confidence: detector.confidence.unwrap_or(defaults.detector.confidence),
                nms_iou: detector.nms_iou.unwrap_or(defaults.detector.nms_iou),
            },
            size_rank: SizeRankSettings {
                class_ids: size_rank.class_ids.unwrap_or(defaults.size_rank.class_ids),
                max_ranked: size_rank.max_ranked.unwrap_or(defaults.size_rank.max_ranked),
                image_name: size_rank.image_name.unwrap_or(defaults.size_rank.image_name),
            },
            proximity: ProximitySettings {
                class_ids: proximity.class_ids.unwrap_or(defaults.proximity.class_ids),
                top_k: proximity.top_k.unwrap_or(defaults.proximity.top_k),
                clip_half_window_secs: proximity
                    .clip_half_window_secs
                    .unwrap_or(defaults.proximity.clip_half_window_secs),
                cadence: parse_cadence(
                    proximity.cadence.as_deref(),
                    proximity.sample_interval_secs,
                    defaults.proximity.cadence,
                )?,
            },
            loss: LossSettings {
                iou_threshold: loss.iou_threshold.unwrap_or(defaults.loss.iou_threshold),
                tolerance_secs: loss.tolerance_secs.unwrap_or(defaults.loss.tolerance_secs),
                cadence: parse_cadence(
                    loss.cadence.as_deref(),
                    loss.sample_interval_secs,
                    defaults.loss.cadence,
                )?,
            },
            search: SearchSettings {
                sample_every_frames: search
                    .sample_every_frames
                    .unwrap_or(defaults.search.sample_every_frames),
                min_confidence: search.min_confidence.unwrap_or(defaults.search.min_confidence),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("FOOTAGE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(device) = std::env::var("FOOTAGE_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device.parse()?;
            }
        }
        if let Ok(codec) = std::env::var("FOOTAGE_CODEC") {
            if !codec.trim().is_empty() {
                self.codec = codec.trim().parse()?;
            }
        }
        if let Ok(confidence) = std::env::var("FOOTAGE_MIN_CONFIDENCE") {
            self.search.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("FOOTAGE_MIN_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(tolerance) = std::env::var("FOOTAGE_LOSS_TOLERANCE_SECS") {
            self.loss.tolerance_secs = tolerance.trim().parse().map_err(|_| {
                anyhow!("FOOTAGE_LOSS_TOLERANCE_SECS must be a number of seconds")
            })?;
        }
        if let Ok(path) = std::env::var("FOOTAGE_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("FOOTAGE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_unit("detector.confidence", self.detector.confidence as f64)?;
        check_unit("search.min_confidence", self.search.min_confidence as f64)?;
        if !(self.detector.nms_iou > 0.0 && self.detector.nms_iou < 1.0) {
            return Err(anyhow!("detector.nms_iou must be in (0, 1)"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be greater than zero"));
        }
        if !(self.loss.iou_threshold > 0.0 && self.loss.iou_threshold < 1.0) {
            return Err(anyhow!("loss.iou_threshold must be in (0, 1)"));
        }
        if !(self.loss.tolerance_secs.is_finite() && self.loss.tolerance_secs > 0.0) {
            return Err(anyhow!("loss.tolerance_secs must be greater than zero"));
        }
        self.loss.cadence.validate()?;
        self.proximity.cadence.validate()?;
        if self.proximity.top_k == 0 {
            return Err(anyhow!("proximity.top_k must be at least 1"));
        }
        if !(self.proximity.clip_half_window_secs.is_finite()
            && self.proximity.clip_half_window_secs > 0.0)
        {
            return Err(anyhow!("proximity.clip_half_window_secs must be greater than zero"));
        }
        if self.size_rank.max_ranked == 0 {
            return Err(anyhow!("size_rank.max_ranked must be at least 1"));
        }
        if self.size_rank.image_name.trim().is_empty() {
            return Err(anyhow!("size_rank.image_name must not be empty"));
        }
        if self.size_rank.class_ids.is_empty() || self.proximity.class_ids.is_empty() {
            return Err(anyhow!("class id lists must not be empty"));
        }
        if self.search.sample_every_frames == 0 {
            return Err(anyhow!("search.sample_every_frames must be at least 1"));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be between 0 and 1, got {}", name, value));
    }
    Ok(())
}

fn parse_cadence(mode: Option<&str>, interval: Option<f64>, default: Cadence) -> Result<Cadence> {
    let default_interval = match default {
        Cadence::FrameStride { interval_secs } | Cadence::TimeStride { interval_secs } => {
            interval_secs
        }
        Cadence::EveryNthFrame { .. } => 1.0,
    };
    let interval_secs = interval.unwrap_or(default_interval);
    match mode.map(|m| m.trim().to_ascii_lowercase()) {
        None => Ok(match default {
            Cadence::FrameStride { .. } => Cadence::FrameStride { interval_secs },
            Cadence::TimeStride { .. } => Cadence::TimeStride { interval_secs },
            other => other,
        }),
        Some(mode) => match mode.as_str() {
            "time" => Ok(Cadence::TimeStride { interval_secs }),
            "frame" => Ok(Cadence::FrameStride { interval_secs }),
            other => Err(anyhow!("unknown cadence '{}', expected 'time' or 'frame'", other)),
        },
    }
}

fn read_config_file(path: &Path) -> Result<AnalysisConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AnalysisConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.proximity.class_ids, vec![2, 3, 5, 7]);
        assert_eq!(cfg.size_rank.max_ranked, 6);
        assert_eq!(cfg.codec.as_str(), "avc1");
    }

    #[test]
    fn per_second_workflows_default_to_time_stride() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.proximity.cadence, Cadence::PER_SECOND);
        assert_eq!(cfg.loss.cadence, Cadence::PER_SECOND);
    }

    #[test]
    fn cadence_mode_and_interval_combine() {
        let cadence = parse_cadence(Some("time"), Some(2.0), Cadence::PER_SECOND).unwrap();
        assert_eq!(cadence, Cadence::TimeStride { interval_secs: 2.0 });
        let cadence = parse_cadence(None, Some(0.5), Cadence::FrameStride { interval_secs: 1.0 }).unwrap();
        assert_eq!(cadence, Cadence::FrameStride { interval_secs: 0.5 });
        assert!(parse_cadence(Some("hourly"), None, Cadence::PER_SECOND).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = AnalysisConfig::default();
        cfg.loss.iou_threshold = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AnalysisConfig::default();
        cfg.proximity.top_k = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AnalysisConfig::default();
        cfg.search.min_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }
}
