use serde::{Deserialize, Serialize};

/// Integer pixel box, corners `(x1, y1)` top-left and `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Builds a box from floating point corners, truncating toward zero.
    ///
    /// Returns `None` when the truncated box has no extent.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        let bbox = Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32);
        bbox.is_valid().then_some(bbox)
    }

    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    pub fn width(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64).max(0)
    }

    pub fn height(&self) -> i64 {
        (self.y2 as i64 - self.y1 as i64).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    /// Euclidean distance between box centers, in pixels.
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> i64 {
        let x1 = self.x1.max(other.x1) as i64;
        let y1 = self.y1.max(other.y1) as i64;
        let x2 = self.x2.min(other.x2) as i64;
        let y2 = self.y2.min(other.y2) as i64;
        (x2 - x1).max(0) * (y2 - y1).max(0)
    }

    /// Intersection over union. Zero when the union is empty.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }

    /// Clamps the box into a `width x height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let max_x = width as i32;
        let max_y = height as i32;
        BoundingBox {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
        }
    }
}

/// Raw model output for one object, before label resolution and filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

/// Normalized detection record produced by the detection adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn area(&self) -> i64 {
        self.bbox.area()
    }
}
