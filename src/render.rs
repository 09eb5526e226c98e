//! Burned-in annotations: boxes, filled label backgrounds, text and legends.
//!
//! Text needs a TrueType font. It is loaded from the configured path or the
//! first known system location; without one, boxes and label backgrounds are
//! still drawn and text is skipped.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::BoundingBox;

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Legend swatch geometry: rows start at y=30 and advance 30px.
const LEGEND_TOP: i32 = 30;
const LEGEND_STEP: i32 = 30;

/// One box to burn into a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub label: String,
    pub color: Rgb<u8>,
}

impl Overlay {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, color: Rgb<u8>) -> Self {
        Self {
            bbox,
            label: label.into(),
            color,
        }
    }
}

pub struct Renderer {
    font: Option<FontVec>,
    scale: PxScale,
    thickness: i32,
}

impl Renderer {
    /// Renderer using the font at `font_path`, or a system font when unset.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = match font_path {
            Some(path) => load_font(path),
            None => FONT_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .filter(|p| p.is_file())
                .find_map(|p| load_font(&p)),
        };
        if font.is_none() {
            log::warn!("Renderer: no usable font found, annotations will be drawn without text");
        }
        Self {
            font,
            scale: PxScale::from(16.0),
            thickness: 2,
        }
    }

    /// Renderer that draws shapes only.
    pub fn without_text() -> Self {
        Self {
            font: None,
            scale: PxScale::from(16.0),
            thickness: 2,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Rendered size of `text`. Estimated when no font is loaded.
    pub fn text_size(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(self.scale, font, text),
            None => (text.chars().count() as u32 * 8, 12),
        }
    }

    pub fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
        for offset in 0..self.thickness {
            let width = bbox.width() - 2 * offset as i64;
            let height = bbox.height() - 2 * offset as i64;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 + offset, bbox.y1 + offset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    fn draw_text(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y, self.scale, font, text);
        }
    }

    /// Draws `text` on a filled background whose bottom-left corner is `(x, y)`.
    pub fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, background: Rgb<u8>) {
        let (text_width, text_height) = self.text_size(text);
        let top = (y - text_height as i32 - 4).max(0);
        let bottom = y.max(top + text_height as i32 + 4);
        let rect = Rect::at(x, top).of_size(text_width.max(1), (bottom - top) as u32);
        draw_filled_rect_mut(image, rect, background);
        self.draw_text(image, x, top + 2, text, WHITE);
    }

    /// Box plus a label sitting on the box's top edge.
    pub fn draw_overlay(&self, image: &mut RgbImage, overlay: &Overlay) {
        self.draw_box(image, &overlay.bbox, overlay.color);
        self.draw_label(image, overlay.bbox.x1, overlay.bbox.y1, &overlay.label, overlay.color);
    }

    pub fn draw_overlays(&self, image: &mut RgbImage, overlays: &[Overlay]) {
        for overlay in overlays {
            self.draw_overlay(image, overlay);
        }
    }

    /// Top-left legend, one swatch and caption per entry.
    pub fn draw_legend(&self, image: &mut RgbImage, entries: &[(&str, Rgb<u8>)]) {
        let mut y = LEGEND_TOP;
        for (caption, color) in entries {
            draw_filled_rect_mut(image, Rect::at(10, y - 20).of_size(20, 20), *color);
            let (_, text_height) = self.text_size(caption);
            self.draw_text(image, 40, y - text_height as i32, caption, *color);
            y += LEGEND_STEP;
        }
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Renderer: cannot read font {}: {}", path.display(), e);
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => {
            log::debug!("Renderer: loaded font {}", path.display());
            Some(font)
        }
        Err(e) => {
            log::warn!("Renderer: invalid font {}: {}", path.display(), e);
            None
        }
    }
}
