use super::backend::{DetectorBackend, Device};
use super::result::{BoundingBox, Detection};
use crate::error::{AnalysisError, AnalysisResult};
use crate::video::Frame;

/// Which detections survive normalization.
///
/// `class_ids` is forwarded to the model boundary; `labels` and
/// `min_confidence` are applied to the normalized records afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionFilter {
    pub class_ids: Option<Vec<u32>>,
    pub labels: Option<Vec<String>>,
    pub min_confidence: f32,
}

impl DetectionFilter {
    /// Keeps everything the model returns.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn classes(class_ids: &[u32]) -> Self {
        Self {
            class_ids: Some(class_ids.to_vec()),
            ..Self::default()
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            labels: Some(vec![label.into()]),
            ..Self::default()
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn accepts(&self, detection: &Detection) -> bool {
        if detection.confidence < self.min_confidence {
            return false;
        }
        if let Some(ids) = &self.class_ids {
            if !ids.contains(&detection.class_id) {
                return false;
            }
        }
        match &self.labels {
            Some(labels) => labels.iter().any(|l| *l == detection.label),
            None => true,
        }
    }
}

/// Runs a detector on single frames and normalizes its output.
///
/// Boxes are truncated to integers and clamped into the frame; boxes left
/// without extent are dropped. Confidence is clamped into `[0, 1]` and class
/// ids are resolved through the backend's label table.
pub struct DetectionAdapter {
    backend: Box<dyn DetectorBackend>,
    device: Device,
    warmed_up: bool,
}

impl DetectionAdapter {
    /// Wraps `backend`, running on `device` when the backend supports it and
    /// on the backend's preferred device otherwise.
    pub fn new(backend: Box<dyn DetectorBackend>, device: Device) -> Self {
        let available = backend.devices();
        let device = if available.contains(&device) {
            device
        } else {
            let fallback = Device::preferred(&available);
            log::warn!(
                "DetectionAdapter: backend '{}' cannot run on {}, using {}",
                backend.name(),
                device,
                fallback
            );
            fallback
        };
        Self {
            backend,
            device,
            warmed_up: false,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn label(&self, class_id: u32) -> Option<&str> {
        self.backend.label(class_id)
    }

    pub fn class_id(&self, label: &str) -> Option<u32> {
        self.backend.class_id(label)
    }

    fn detector_error(&self, err: anyhow::Error) -> AnalysisError {
        AnalysisError::Detector {
            backend: self.backend.name().to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn warm_up(&mut self) -> AnalysisResult<()> {
        if self.warmed_up {
            return Ok(());
        }
        log::info!(
            "DetectionAdapter: warming up backend '{}' on {}",
            self.backend.name(),
            self.device
        );
        self.backend.warm_up().map_err(|e| self.detector_error(e))?;
        self.warmed_up = true;
        Ok(())
    }

    /// Detect objects in `frame`, keeping only those `filter` accepts.
    pub fn detect(
        &mut self,
        frame: &Frame,
        filter: &DetectionFilter,
    ) -> AnalysisResult<Vec<Detection>> {
        self.warm_up()?;
        let predictions = self
            .backend
            .predict(frame, filter.class_ids.as_deref(), self.device)
            .map_err(|e| self.detector_error(e))?;

        let (width, height) = (frame.width(), frame.height());
        let mut detections = Vec::with_capacity(predictions.len());
        for p in predictions {
            let Some(bbox) = BoundingBox::from_corners(p.x1, p.y1, p.x2, p.y2) else {
                continue;
            };
            let bbox = bbox.clamp_to(width, height);
            if !bbox.is_valid() {
                continue;
            }
            let label = match self.backend.label(p.class_id) {
                Some(label) => label.to_string(),
                None => format!("class_{}", p.class_id),
            };
            let confidence = if p.confidence.is_finite() {
                p.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let detection = Detection {
                label,
                class_id: p.class_id,
                confidence,
                bbox,
            };
            if filter.accepts(&detection) {
                detections.push(detection);
            }
        }
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::result::Prediction;
    use image::RgbImage;

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            image: RgbImage::new(100, 50),
        }
    }

    fn pred(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> Prediction {
        Prediction {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    #[test]
    fn normalizes_boxes_and_labels() {
        let backend = ScriptedBackend::new().at_frame(
            0,
            vec![
                pred(10.7, 5.2, 40.9, 30.1, 0.9, 2),
                pred(-5.0, -5.0, 120.0, 60.0, 1.3, 7),
                pred(20.0, 20.0, 20.5, 40.0, 0.8, 2),
            ],
        );
        let mut adapter = DetectionAdapter::new(Box::new(backend), Device::Cpu);
        let detections = adapter.detect(&frame(0), &DetectionFilter::any()).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox, BoundingBox::new(10, 5, 40, 30));
        assert_eq!(detections[0].label, "car");
        assert_eq!(detections[1].bbox, BoundingBox::new(0, 0, 100, 50));
        assert_eq!(detections[1].label, "truck");
        assert_eq!(detections[1].confidence, 1.0);
    }

    #[test]
    fn filters_by_class_label_and_confidence() {
        let backend = ScriptedBackend::new().at_frame(
            3,
            vec![
                pred(0.0, 0.0, 10.0, 10.0, 0.9, 2),
                pred(0.0, 0.0, 10.0, 10.0, 0.2, 2),
                pred(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            ],
        );
        let mut adapter = DetectionAdapter::new(Box::new(backend), Device::Cpu);
        let cars = adapter
            .detect(&frame(3), &DetectionFilter::classes(&[2]))
            .unwrap();
        assert_eq!(cars.len(), 2);

        let confident_people = adapter
            .detect(&frame(3), &DetectionFilter::label("person").with_min_confidence(0.5))
            .unwrap();
        assert_eq!(confident_people.len(), 1);
        assert_eq!(confident_people[0].class_id, 0);
    }

    #[test]
    fn backend_failure_is_detector_error() {
        let backend = ScriptedBackend::new().failing_at(1);
        let mut adapter = DetectionAdapter::new(Box::new(backend), Device::Cpu);
        assert!(adapter.detect(&frame(0), &DetectionFilter::any()).unwrap().is_empty());
        match adapter.detect(&frame(1), &DetectionFilter::any()) {
            Err(AnalysisError::Detector { backend, .. }) => assert_eq!(backend, "scripted"),
            other => panic!("expected detector error, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_device_falls_back_to_backend_preference() {
        let cpu_only = DetectionAdapter::new(Box::new(ScriptedBackend::new()), Device::Cuda);
        assert_eq!(cpu_only.device(), Device::Cpu);

        let gpu = ScriptedBackend::new().supporting(&[Device::Cpu, Device::Cuda]);
        assert_eq!(DetectionAdapter::new(Box::new(gpu.clone()), Device::Cuda).device(), Device::Cuda);
        assert_eq!(DetectionAdapter::new(Box::new(gpu), Device::Mps).device(), Device::Cuda);
    }
}
