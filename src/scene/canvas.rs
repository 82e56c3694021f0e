//! Screenshot annotation.
//!
//! `Canvas` wraps a screenshot and provides the drawing primitives used to
//! prepare oracle images:
//! - `outline()` - Draw a rectangle border around widget bounds
//! - `draw_text()` - Draw scaled text using font8x8 glyphs
//! - `get_pixel()` / `set_pixel()` - Direct pixel access
//!
//! It also doubles as a programmable framebuffer for test fixtures.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageResult, Rgb, RgbImage};
use std::io::Cursor;

use super::widget::Bounds;

pub const RED: [u8; 3] = [255, 0, 0];
pub const WHITE: [u8; 3] = [255, 255, 255];
pub const GREEN: [u8; 3] = [0, 160, 0];

/// Border width of widget boxes
const OUTLINE_THICKNESS: u32 = 4;

/// Scale factor applied to 8x8 glyphs for index labels
const LABEL_SCALE: u32 = 4;

/// Drawable RGB image
#[derive(Debug, Clone)]
pub struct Canvas {
    image: RgbImage,
}

impl Canvas {
    /// Create a new canvas with the given dimensions, initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    /// Create a canvas initialized to a specific color
    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(color)),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Load a canvas from encoded image bytes (PNG, JPEG, ...)
    pub fn from_png_bytes(data: &[u8]) -> ImageResult<Self> {
        Ok(Self {
            image: image::load_from_memory(data)?.to_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Fill the entire canvas with a color
    pub fn fill(&mut self, color: [u8; 3]) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgb(color);
        }
    }

    /// Draw a filled rectangle
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height()) {
            for px in x..(x + w).min(self.width()) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw the border of `bounds`, clipped to the canvas
    pub fn outline(&mut self, bounds: &Bounds, color: [u8; 3], thickness: u32) {
        let left = bounds.left.max(0) as u32;
        let top = bounds.top.max(0) as u32;
        let right = bounds.right.max(0) as u32;
        let bottom = bounds.bottom.max(0) as u32;
        if right <= left || bottom <= top {
            return;
        }
        let w = right - left;
        let h = bottom - top;
        let t = thickness.min(w).min(h).max(1);
        self.draw_rect(left, top, w, t, color);
        self.draw_rect(left, bottom - t, w, t, color);
        self.draw_rect(left, top, t, h, color);
        self.draw_rect(right - t, top, t, h, color);
    }

    /// Draw text using font8x8 glyphs magnified by `scale`
    ///
    /// Background pixels are left untouched. Text does not wrap.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], scale: u32) {
        let scale = scale.max(1);
        let mut cursor_x = x;
        for ch in text.chars() {
            self.draw_char(cursor_x, y, ch, fg, scale);
            cursor_x += 8 * scale;
            if cursor_x >= self.width() {
                break;
            }
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], scale: u32) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            for bit in 0..8 {
                // font8x8 stores LSB as leftmost pixel
                if (row >> bit) & 1 == 1 {
                    self.draw_rect(x + bit * scale, y + row_idx as u32 * scale, scale, scale, fg);
                }
            }
        }
    }

    /// Get the color of a pixel
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width() || y >= self.height() {
            return [0, 0, 0];
        }
        self.image.get_pixel(x, y).0
    }

    /// Set the color of a pixel
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width() || y >= self.height() {
            return;
        }
        self.image.put_pixel(x, y, Rgb(color));
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Encode the canvas as PNG bytes
    pub fn to_png(&self) -> ImageResult<Vec<u8>> {
        encode_png(&self.image)
    }
}

/// Encode an image as PNG bytes
pub fn encode_png(image: &RgbImage) -> ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

/// Copy of `screenshot` with each bounds boxed in red and labeled with its
/// 1-based position in `targets`
pub fn annotate_indexed(screenshot: &RgbImage, targets: &[Bounds]) -> RgbImage {
    let labeled: Vec<(usize, Bounds)> = targets.iter().copied().enumerate().map(|(i, b)| (i + 1, b)).collect();
    annotate_labeled(screenshot, &labeled, RED)
}

/// Copy of `screenshot` with each bounds boxed in `color` and labeled with
/// the number paired with it
pub fn annotate_labeled(screenshot: &RgbImage, targets: &[(usize, Bounds)], color: [u8; 3]) -> RgbImage {
    let mut canvas = Canvas::from_image(screenshot.clone());
    for (label, bounds) in targets {
        canvas.outline(bounds, color, OUTLINE_THICKNESS);
        let x = bounds.left.max(0) as u32 + OUTLINE_THICKNESS;
        let y = bounds.top.max(0) as u32 + OUTLINE_THICKNESS;
        let label = label.to_string();
        let label_w = 8 * LABEL_SCALE * label.len() as u32;
        canvas.draw_rect(x, y, label_w, 8 * LABEL_SCALE, WHITE);
        canvas.draw_text(x, y, &label, color, LABEL_SCALE);
    }
    canvas.into_image()
}

/// Copy of `screenshot` with a single red box
pub fn mark_bounds(screenshot: &RgbImage, bounds: &Bounds) -> RgbImage {
    let mut canvas = Canvas::from_image(screenshot.clone());
    canvas.outline(bounds, RED, OUTLINE_THICKNESS);
    canvas.into_image()
}

/// Copy of `screenshot` with the acted-on widget boxed and `title` in the
/// top-left corner
pub fn mark_action(screenshot: &RgbImage, bounds: Option<&Bounds>, title: &str) -> RgbImage {
    let mut canvas = Canvas::from_image(screenshot.clone());
    if let Some(bounds) = bounds {
        canvas.outline(bounds, RED, OUTLINE_THICKNESS);
    }
    canvas.draw_text(0, 0, title, RED, LABEL_SCALE);
    canvas.into_image()
}

/// Place images side by side, top-aligned, on a white background
pub fn concat_horizontal(images: &[&RgbImage]) -> RgbImage {
    let width: u32 = images.iter().map(|img| img.width()).sum();
    let height = images.iter().map(|img| img.height()).max().unwrap_or(0);
    let mut out = RgbImage::from_pixel(width, height, Rgb(WHITE));
    let mut offset = 0;
    for img in images {
        for (x, y, pixel) in img.enumerate_pixels() {
            out.put_pixel(offset + x, y, *pixel);
        }
        offset += img.width();
    }
    out
}

/// True when every pixel sampled on a `step` grid lies within `tolerance`
/// of the others on each channel
pub fn is_near_uniform(image: &RgbImage, step: u32, tolerance: u8) -> bool {
    let step = step.max(1);
    let mut min = [u8::MAX; 3];
    let mut max = [u8::MIN; 3];
    for y in (0..image.height()).step_by(step as usize) {
        for x in (0..image.width()).step_by(step as usize) {
            let px = image.get_pixel(x, y).0;
            for c in 0..3 {
                min[c] = min[c].min(px[c]);
                max[c] = max[c].max(px[c]);
            }
        }
    }
    (0..3).all(|c| max[c].saturating_sub(min[c]) <= tolerance)
}
