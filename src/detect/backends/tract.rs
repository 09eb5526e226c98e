#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, Device};
use crate::detect::result::Prediction;
use crate::video::Frame;

/// Letterbox padding color used by YOLO exports.
const PAD: Rgb<u8> = Rgb([114, 114, 114]);

/// Tract-based YOLOv8 backend for ONNX inference.
///
/// Expects a square `[1, 3, S, S]` input and a `[1, 4 + classes, N]` output
/// with center/size boxes in input pixels. CPU only.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    confidence_threshold: f32,
    nms_iou: f32,
}

/// Placement of the source frame inside the square model input.
struct Letterbox {
    scale: f32,
    x_offset: f32,
    y_offset: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            nms_iou: 0.45,
        })
    }

    pub fn with_thresholds(mut self, confidence: f32, nms_iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.nms_iou = nms_iou;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Result<(Tensor, Letterbox)> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("empty frame"));
        }
        let side = self.input_size;
        let scale = side as f32 / width.max(height) as f32;
        let new_width = ((width as f32 * scale) as u32).clamp(1, side);
        let new_height = ((height as f32 * scale) as u32).clamp(1, side);
        let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(side, side, PAD);
        let x_offset = (side - new_width) / 2;
        let y_offset = (side - new_height) / 2;
        imageops::replace(&mut canvas, &resized, x_offset as i64, y_offset as i64);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, side as usize, side as usize),
            |(_, channel, y, x)| canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        let letterbox = Letterbox {
            scale,
            x_offset: x_offset as f32,
            y_offset: y_offset as f32,
        };
        Ok((input.into_tensor(), letterbox))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        class_filter: Option<&[u32]>,
    ) -> Result<Vec<Prediction>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }
        let num_classes = shape[1] - 4;
        let num_boxes = shape[2];

        let mut candidates = Vec::new();
        for i in 0..num_boxes {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class_idx in 0..num_classes {
                let score = view[[0, 4 + class_idx, i]];
                if score > best_score {
                    best_score = score;
                    best_class = class_idx;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }
            let class_id = best_class as u32;
            if class_filter.is_some_and(|ids| !ids.contains(&class_id)) {
                continue;
            }
            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let w = view[[0, 2, i]];
            let h = view[[0, 3, i]];
            let unmap_x = |x: f32| (x - letterbox.x_offset) / letterbox.scale;
            let unmap_y = |y: f32| (y - letterbox.y_offset) / letterbox.scale;
            candidates.push(Prediction {
                x1: unmap_x(cx - w / 2.0),
                y1: unmap_y(cy - h / 2.0),
                x2: unmap_x(cx + w / 2.0),
                y2: unmap_y(cy + h / 2.0),
                confidence: best_score,
                class_id,
            });
        }
        Ok(nms(candidates, self.nms_iou))
    }
}

fn prediction_iou(a: &Prediction, b: &Prediction) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = ix * iy;
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Per-class non-maximum suppression, highest confidence first.
fn nms(mut predictions: Vec<Prediction>, iou_threshold: f32) -> Vec<Prediction> {
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut suppressed = vec![false; predictions.len()];
    let mut keep = Vec::new();
    for i in 0..predictions.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..predictions.len() {
            if !suppressed[j]
                && predictions[j].class_id == predictions[i].class_id
                && prediction_iou(&predictions[i], &predictions[j]) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
        keep.push(predictions[i].clone());
    }
    keep
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(
        &mut self,
        frame: &Frame,
        class_filter: Option<&[u32]>,
        _device: Device,
    ) -> Result<Vec<Prediction>> {
        let (input, letterbox) = self.build_input(&frame.image)?;
        let outputs = self
            .model
            .run(tvec!(input.into_tvalue()))
            .context("ONNX inference failed")?;
        self.decode(outputs, &letterbox, class_filter)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame {
            index: 0,
            image: RgbImage::from_pixel(side, side, PAD),
        };
        self.predict(&blank, None, Device::Cpu).map(|_| ())
    }
}
