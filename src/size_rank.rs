//! Size ranking of the vehicles visible at one moment of a recording.
//!
//! Detections are ranked by box area, largest first, and bucketed into
//! relative size categories against the spread of areas in the same frame.
//! The annotated frame is written under a fixed name in the output directory,
//! replacing the previous one.

use std::fmt;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use serde::Serialize;

use crate::context::AnalysisContext;
use crate::detect::{BoundingBox, Detection, DetectionFilter};
use crate::error::{AnalysisError, AnalysisResult};
use crate::render::{Renderer, GREEN, ORANGE, RED};
use crate::video::Frame;

/// Relative size bucket, largest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SizeCategory {
    #[serde(rename = "Very Large")]
    VeryLarge,
    #[serde(rename = "Large")]
    Large,
    #[serde(rename = "Medium")]
    Medium,
}

impl SizeCategory {
    pub const ALL: [SizeCategory; 3] = [Self::VeryLarge, Self::Large, Self::Medium];

    pub fn name(&self) -> &'static str {
        match self {
            Self::VeryLarge => "Very Large",
            Self::Large => "Large",
            Self::Medium => "Medium",
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            Self::VeryLarge => RED,
            Self::Large => ORANGE,
            Self::Medium => GREEN,
        }
    }

    fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or(Self::Medium)
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detection with its area and 1-based rank by area.
#[derive(Clone, Debug, PartialEq)]
pub struct SizedDetection {
    pub detection: Detection,
    pub area: i64,
    pub rank: u32,
    pub category: SizeCategory,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedVehicle {
    pub vehicle_id: u32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub category: SizeCategory,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SizeRanking {
    pub image_path: PathBuf,
    pub vehicles: Vec<RankedVehicle>,
}

/// Category thresholds for areas sorted largest first.
///
/// With two or more areas: `min + 0.8 * range`, `min + 0.6 * range`, `min`.
/// With fewer, every threshold is zero so everything lands in the first bucket.
pub fn size_thresholds(sorted_areas: &[i64]) -> [f64; 3] {
    if sorted_areas.len() < 2 {
        return [0.0; 3];
    }
    let max = sorted_areas[0] as f64;
    let min = sorted_areas[sorted_areas.len() - 1] as f64;
    let range = max - min;
    [min + range * 0.8, min + range * 0.6, min]
}

pub fn categorize(area: i64, thresholds: &[f64; 3]) -> SizeCategory {
    thresholds
        .iter()
        .position(|threshold| area as f64 >= *threshold)
        .map(SizeCategory::from_index)
        .unwrap_or(SizeCategory::Medium)
}

/// Ranks `detections` by area, keeping at most `max_ranked` entries.
///
/// Thresholds are computed over all detections before truncation. Equal
/// areas keep detector order.
pub fn rank_by_size(detections: Vec<Detection>, max_ranked: usize) -> Vec<SizedDetection> {
    let mut sized: Vec<(i64, Detection)> = detections.into_iter().map(|d| (d.area(), d)).collect();
    sized.sort_by(|a, b| b.0.cmp(&a.0));
    let areas: Vec<i64> = sized.iter().map(|(area, _)| *area).collect();
    let thresholds = size_thresholds(&areas);
    sized
        .into_iter()
        .take(max_ranked)
        .enumerate()
        .map(|(i, (area, detection))| SizedDetection {
            detection,
            area,
            rank: i as u32 + 1,
            category: categorize(area, &thresholds),
        })
        .collect()
}

/// Draws the legend and one labelled box per ranked detection.
pub fn render_ranking(renderer: &Renderer, image: &mut RgbImage, ranked: &[SizedDetection]) {
    let legend: Vec<(&str, Rgb<u8>)> = SizeCategory::ALL
        .iter()
        .map(|c| (c.name(), c.color()))
        .collect();
    renderer.draw_legend(image, &legend);
    for entry in ranked {
        let color = entry.category.color();
        let bbox = &entry.detection.bbox;
        renderer.draw_box(image, bbox, color);
        renderer.draw_label(image, bbox.x1, bbox.y1, &format!("ID:{}", entry.rank), color);
    }
}

/// Ranks the configured classes in `frame` and writes the annotated image.
pub fn annotate_frame(ctx: &mut AnalysisContext, frame: &Frame) -> AnalysisResult<SizeRanking> {
    let filter = DetectionFilter::classes(&ctx.config.size_rank.class_ids);
    let detections = ctx.detector().detect(frame, &filter)?;
    let ranked = rank_by_size(detections, ctx.config.size_rank.max_ranked);

    let mut image = frame.image.clone();
    render_ranking(ctx.renderer(), &mut image, &ranked);
    let image_path = ctx.output_path(&ctx.config.size_rank.image_name)?;
    image
        .save(&image_path)
        .map_err(|e| AnalysisError::write(&image_path, e))?;
    log::info!(
        "size_rank: {} ranked of frame {} written to {}",
        ranked.len(),
        frame.index,
        image_path.display()
    );

    let vehicles = ranked
        .into_iter()
        .map(|entry| RankedVehicle {
            vehicle_id: entry.rank,
            bbox: entry.detection.bbox,
            category: entry.category,
        })
        .collect();
    Ok(SizeRanking {
        image_path,
        vehicles,
    })
}

/// Reads the frame at `start_time` from `video` and ranks it.
pub fn annotate_vehicles(
    ctx: &mut AnalysisContext,
    video: &Path,
    start_time: f64,
) -> AnalysisResult<SizeRanking> {
    let frame = read_frame_at(ctx, video, start_time)?;
    annotate_frame(ctx, &frame)
}

/// Single frame at `start_time`; `OutOfRange` past the end.
pub fn read_frame_at(ctx: &AnalysisContext, video: &Path, start_time: f64) -> AnalysisResult<Frame> {
    let mut source = ctx.video().open(video)?;
    let props = source.properties();
    props.check_start(start_time)?;
    source.seek_frame(props.frame_at(start_time))?;
    source
        .read()?
        .ok_or_else(|| AnalysisError::io(video, format!("no frame at {start_time:.2}s")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            label: "car".to_string(),
            class_id: 2,
            confidence: 0.9,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    #[test]
    fn categories_follow_relative_thresholds() {
        // areas 10000, 8500, 7000, 5000, 1000
        let detections = vec![
            car(0, 0, 10, 100),
            car(0, 0, 100, 100),
            car(0, 0, 70, 100),
            car(0, 0, 85, 100),
            car(0, 0, 50, 100),
        ];
        let ranked = rank_by_size(detections, 6);
        let summary: Vec<(u32, i64, SizeCategory)> =
            ranked.iter().map(|r| (r.rank, r.area, r.category)).collect();
        // t0 = 1000 + 0.8 * 9000 = 8200, t1 = 6400
        assert_eq!(
            summary,
            vec![
                (1, 10000, SizeCategory::VeryLarge),
                (2, 8500, SizeCategory::VeryLarge),
                (3, 7000, SizeCategory::Large),
                (4, 5000, SizeCategory::Medium),
                (5, 1000, SizeCategory::Medium),
            ]
        );
    }

    #[test]
    fn categories_never_overlap() {
        let detections: Vec<Detection> = (1..=6).map(|i| car(0, 0, i * 17, 40)).collect();
        let ranked = rank_by_size(detections, 6);
        for pair in ranked.windows(2) {
            assert!(pair[0].area >= pair[1].area);
            assert!(pair[0].category <= pair[1].category);
        }
    }

    #[test]
    fn output_is_capped() {
        let detections: Vec<Detection> = (1..=9).map(|i| car(0, 0, i * 10, 10)).collect();
        let ranked = rank_by_size(detections, 6);
        assert_eq!(ranked.len(), 6);
        assert_eq!(ranked[0].area, 900);
        assert_eq!(ranked.last().unwrap().rank, 6);
    }

    #[test]
    fn single_detection_uses_degenerate_thresholds() {
        assert_eq!(size_thresholds(&[500]), [0.0; 3]);
        let ranked = rank_by_size(vec![car(0, 0, 5, 5)], 6);
        assert_eq!(ranked[0].category, SizeCategory::VeryLarge);
        assert!(rank_by_size(Vec::new(), 6).is_empty());
    }

    #[test]
    fn equal_areas_all_very_large() {
        let ranked = rank_by_size(vec![car(0, 0, 10, 10), car(50, 50, 60, 60)], 6);
        assert!(ranked.iter().all(|r| r.category == SizeCategory::VeryLarge));
        assert_eq!(ranked[0].detection.bbox.x1, 0);
    }

    #[test]
    fn ranked_vehicle_serializes_box_field() {
        let vehicle = RankedVehicle {
            vehicle_id: 1,
            bbox: BoundingBox::new(1, 2, 3, 4),
            category: SizeCategory::Large,
        };
        let json = serde_json::to_value(&vehicle).unwrap();
        assert_eq!(json["box"]["x2"], 3);
        assert_eq!(json["category"], "Large");
    }
}
