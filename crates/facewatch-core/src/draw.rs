//! Box and label rendering onto RGB frames.

use crate::types::FaceRegion;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const INTRUDER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const BOX_THICKNESS: u32 = 2;
/// Gap between the label baseline and the top of the box.
const LABEL_OFFSET: i32 = 10;
const LABEL_SCALE: f32 = 24.0;

#[derive(Error, Debug)]
pub enum DrawError {
    #[error("failed to read font {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font file: {0}")]
    InvalidFont(String),
}

/// Draws face boxes and labels. Labels need a TrueType font; without one only
/// boxes are drawn.
pub struct Painter {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Painter {
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            font,
            scale: PxScale::from(LABEL_SCALE),
        }
    }

    /// Painter that draws boxes only.
    pub fn boxes_only() -> Self {
        Self::new(None)
    }

    pub fn from_font_file(path: &Path) -> Result<Self, DrawError> {
        let bytes = std::fs::read(path).map_err(|source| DrawError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| DrawError::InvalidFont(path.display().to_string()))?;
        Ok(Self::new(Some(font)))
    }

    /// Load the font at `path`, falling back to boxes only with a warning.
    pub fn load_or_boxes_only(path: &Path) -> Self {
        match Self::from_font_file(path) {
            Ok(painter) => {
                tracing::info!(font = %path.display(), "label font loaded");
                painter
            }
            Err(e) => {
                tracing::warn!(error = %e, "labels will not be rendered");
                Self::boxes_only()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Hollow rectangle, `BOX_THICKNESS` pixels wide, drawn inside the region.
    pub fn draw_box(&self, image: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>) {
        for inset in 0..BOX_THICKNESS {
            let (w, h) = (
                region.width.saturating_sub(2 * inset),
                region.height.saturating_sub(2 * inset),
            );
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    /// Text with its baseline `LABEL_OFFSET` pixels above the region, kept inside the frame.
    pub fn draw_label(
        &self,
        image: &mut RgbImage,
        region: &FaceRegion,
        text: &str,
        color: Rgb<u8>,
    ) {
        let Some(font) = &self.font else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let (_, text_h) = text_size(self.scale, font, text);
        let top = (region.y as i32 - LABEL_OFFSET - text_h as i32).max(0);
        draw_text_mut(image, color, region.x as i32, top, self.scale, font, text);
    }
}
