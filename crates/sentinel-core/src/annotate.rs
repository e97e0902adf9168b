//! Frame annotation: colored boxes and identity labels over detected faces.

use crate::types::FaceMatch;
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 18.0;
/// Gap between the label baseline area and the top of the box.
const LABEL_OFFSET: i32 = 22;

/// Default label font on Debian/Fedora-style systems.
pub const DEFAULT_LABEL_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// Draws recognition results onto copies of frames.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// Boxes only, no text labels.
    pub fn plain() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TrueType/OpenType font for labels. A missing or unreadable font
    /// degrades to boxes only.
    pub fn with_font_file(path: &Path) -> Self {
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));

        match font {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "loaded label font");
                Self::with_font(font)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "label font unavailable; drawing boxes only");
                Self::plain()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Copy of `frame` with one box (and label, if a font is loaded) per match.
    pub fn annotate(&self, frame: &RgbImage, matches: &[FaceMatch]) -> RgbImage {
        let mut canvas = frame.clone();
        for m in matches {
            let color = if m.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
            draw_box(&mut canvas, m, color);

            if let Some(font) = &self.font {
                let y = (m.rect.y - LABEL_OFFSET).max(0);
                draw_text_mut(
                    &mut canvas,
                    color,
                    m.rect.x,
                    y,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &m.label(),
                );
            }
        }
        canvas
    }
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("font", &self.font.is_some())
            .finish()
    }
}

/// Nested hollow rectangles give the box its thickness.
fn draw_box(canvas: &mut RgbImage, m: &FaceMatch, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        let width = m.rect.width.saturating_sub(2 * inset).max(1);
        let height = m.rect.height.saturating_sub(2 * inset).max(1);
        let rect = Rect::at(m.rect.x + inset as i32, m.rect.y + inset as i32).of_size(width, height);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}
