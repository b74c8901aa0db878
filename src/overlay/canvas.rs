//! Drawing surfaces for the overlay
//!
//! [`RasterCanvas`] paints into a transparent RGBA buffer that a host can
//! composite over the capture. [`DisplayList`] records the draw calls so a host
//! with its own 2D API can replay them.

use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::glyphs;

/// A 2D surface the overlay renderer draws on
pub trait Canvas {
    /// Surface size as (width, height)
    fn size(&self) -> (u32, u32);

    /// Match the surface to a new capture size
    fn resize(&mut self, width: u32, height: u32);

    /// Clear the whole surface
    fn clear(&mut self);

    /// Stroke the outline of `[x0, y0, x1, y1]`
    fn stroke_rect(&mut self, rect: [f32; 4], color: Rgba<u8>, line_width: u32);

    /// Draw `text` with its baseline at `(x, y)`
    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>);

    /// Fill a disc with a radial gradient from `inner` (center) to `outer` (rim)
    fn fill_radial(&mut self, center: (f32, f32), radius: f32, inner: Rgba<u8>, outer: Rgba<u8>);

    /// Stroke a circle outline
    fn stroke_circle(&mut self, center: (f32, f32), radius: f32, color: Rgba<u8>, line_width: f32);
}

/// One recorded draw call
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear,
    StrokeRect {
        rect: [f32; 4],
        color: Rgba<u8>,
        line_width: u32,
    },
    Text {
        text: String,
        x: f32,
        y: f32,
        color: Rgba<u8>,
    },
    Radial {
        center: (f32, f32),
        radius: f32,
        inner: Rgba<u8>,
        outer: Rgba<u8>,
    },
    Circle {
        center: (f32, f32),
        radius: f32,
        color: Rgba<u8>,
        line_width: f32,
    },
}

/// Canvas that records the calls of the current frame
#[derive(Debug, Clone, Default)]
pub struct DisplayList {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    /// Calls recorded since the last clear
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Rectangles stroked since the last clear
    pub fn rects(&self) -> Vec<[f32; 4]> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::StrokeRect { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }

    /// Text drawn since the last clear
    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Canvas for DisplayList {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.ops.push(DrawOp::Clear);
    }

    fn stroke_rect(&mut self, rect: [f32; 4], color: Rgba<u8>, line_width: u32) {
        self.ops.push(DrawOp::StrokeRect { rect, color, line_width });
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>) {
        self.ops.push(DrawOp::Text {
            text: text.to_string(),
            x,
            y,
            color,
        });
    }

    fn fill_radial(&mut self, center: (f32, f32), radius: f32, inner: Rgba<u8>, outer: Rgba<u8>) {
        self.ops.push(DrawOp::Radial { center, radius, inner, outer });
    }

    fn stroke_circle(&mut self, center: (f32, f32), radius: f32, color: Rgba<u8>, line_width: f32) {
        self.ops.push(DrawOp::Circle { center, radius, color, line_width });
    }
}

/// Canvas backed by a transparent RGBA image
#[derive(Debug, Clone)]
pub struct RasterCanvas {
    image: RgbaImage,
    text_scale: u32,
}

impl RasterCanvas {
    /// Glyph scale that puts the 7-row font near a 14 px line
    const DEFAULT_TEXT_SCALE: u32 = 2;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            text_scale: Self::DEFAULT_TEXT_SCALE,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Paint the overlay over a copy of `frame`
    pub fn composite_over(&self, frame: &RgbaImage) -> RgbaImage {
        let mut out = frame.clone();
        image::imageops::overlay(&mut out, &self.image, 0, 0);
        out
    }

    fn blend_at(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return;
        }
        self.image.get_pixel_mut(x as u32, y as u32).blend(&color);
    }

    /// Pixel bounds of a disc, clipped to the image
    fn disc_bounds(&self, center: (f32, f32), radius: f32) -> (i64, i64, i64, i64) {
        let x0 = (center.0 - radius).floor().max(0.0) as i64;
        let y0 = (center.1 - radius).floor().max(0.0) as i64;
        let x1 = ((center.0 + radius).ceil() as i64).min(self.image.width() as i64 - 1);
        let y1 = ((center.1 + radius).ceil() as i64).min(self.image.height() as i64 - 1);
        (x0, y0, x1, y1)
    }
}

fn lerp_color(a: Rgba<u8>, b: Rgba<u8>, t: f32) -> Rgba<u8> {
    let t = t.clamp(0.0, 1.0);
    let mix = |i: usize| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * t).round() as u8;
    Rgba([mix(0), mix(1), mix(2), mix(3)])
}

impl Canvas for RasterCanvas {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, rect: [f32; 4], color: Rgba<u8>, line_width: u32) {
        let [x0, y0, x1, y1] = rect;
        let left = x0.round() as i32;
        let top = y0.round() as i32;
        let width = (x1 - x0).round().max(1.0) as i32;
        let height = (y1 - y0).round().max(1.0) as i32;

        // Centered on the path like a 2D canvas stroke
        let half = line_width as i32 / 2;
        for step in 0..line_width.max(1) as i32 {
            let inset = step - half;
            let w = width - 2 * inset;
            let h = height - 2 * inset;
            if w < 1 || h < 1 {
                continue;
            }
            draw_hollow_rect_mut(
                &mut self.image,
                Rect::at(left + inset, top + inset).of_size(w as u32, h as u32),
                color,
            );
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgba<u8>) {
        let scale = self.text_scale as i64;
        let top = y.round() as i64 - glyphs::HEIGHT as i64 * scale;
        let mut pen = x.round() as i64;

        for ch in text.chars() {
            if let Some(rows) = glyphs::glyph_bits(ch) {
                for (row, pattern) in rows.iter().enumerate() {
                    for col in 0..5 {
                        if (pattern >> (4 - col)) & 1 == 0 {
                            continue;
                        }
                        for dy in 0..scale {
                            for dx in 0..scale {
                                self.blend_at(
                                    pen + col as i64 * scale + dx,
                                    top + row as i64 * scale + dy,
                                    color,
                                );
                            }
                        }
                    }
                }
            }
            pen += glyphs::ADVANCE as i64 * scale;
        }
    }

    fn fill_radial(&mut self, center: (f32, f32), radius: f32, inner: Rgba<u8>, outer: Rgba<u8>) {
        if radius <= 0.0 {
            return;
        }
        let (x0, y0, x1, y1) = self.disc_bounds(center, radius);
        for py in y0..=y1 {
            for px in x0..=x1 {
                let dx = px as f32 + 0.5 - center.0;
                let dy = py as f32 + 0.5 - center.1;
                let d = (dx * dx + dy * dy).sqrt();
                if d <= radius {
                    self.blend_at(px, py, lerp_color(inner, outer, d / radius));
                }
            }
        }
    }

    fn stroke_circle(&mut self, center: (f32, f32), radius: f32, color: Rgba<u8>, line_width: f32) {
        let half = (line_width / 2.0).max(0.5);
        let (x0, y0, x1, y1) = self.disc_bounds(center, radius + half);
        for py in y0..=y1 {
            for px in x0..=x1 {
                let dx = px as f32 + 0.5 - center.0;
                let dy = py as f32 + 0.5 - center.1;
                let d = (dx * dx + dy * dy).sqrt();
                if (d - radius).abs() <= half {
                    self.blend_at(px, py, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIME: Rgba<u8> = Rgba([0, 255, 0, 255]);

    #[test]
    fn test_raster_stroke_rect_hits_edges_only() {
        let mut canvas = RasterCanvas::new(64, 64);
        canvas.stroke_rect([10.0, 10.0, 50.0, 50.0], LIME, 1);

        assert_eq!(*canvas.image().get_pixel(10, 10), LIME);
        assert_eq!(*canvas.image().get_pixel(30, 10), LIME);
        assert_eq!(canvas.image().get_pixel(30, 30)[3], 0);
    }

    #[test]
    fn test_raster_clear_resets_alpha() {
        let mut canvas = RasterCanvas::new(16, 16);
        canvas.fill_radial((8.0, 8.0), 6.0, LIME, Rgba([0, 255, 0, 77]));
        assert!(canvas.image().pixels().any(|p| p[3] > 0));

        canvas.clear();
        assert!(canvas.image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_raster_resize_only_on_change() {
        let mut canvas = RasterCanvas::new(8, 8);
        canvas.stroke_rect([0.0, 0.0, 7.0, 7.0], LIME, 1);
        canvas.resize(8, 8);
        assert_eq!(*canvas.image().get_pixel(0, 0), LIME);

        canvas.resize(20, 10);
        assert_eq!(canvas.size(), (20, 10));
        assert!(canvas.image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_raster_text_and_offscreen_drawing_is_clipped() {
        let mut canvas = RasterCanvas::new(32, 32);
        canvas.fill_text("bottle (92%)", 2.0, 20.0, Rgba([0, 0, 0, 255]));
        canvas.stroke_circle((-20.0, -20.0), 5.0, LIME, 1.0);
        canvas.fill_radial((40.0, 40.0), 3.0, LIME, LIME);
        assert!(canvas.image().pixels().any(|p| p[3] == 255));
    }

    #[test]
    fn test_composite_keeps_frame_where_overlay_is_clear() {
        let frame = RgbaImage::from_pixel(8, 8, Rgba([200, 10, 10, 255]));
        let mut canvas = RasterCanvas::new(8, 8);
        canvas.stroke_rect([0.0, 0.0, 7.0, 7.0], LIME, 1);

        let out = canvas.composite_over(&frame);
        assert_eq!(*out.get_pixel(0, 0), LIME);
        assert_eq!(*out.get_pixel(4, 4), Rgba([200, 10, 10, 255]));
    }

    #[test]
    fn test_display_list_clear_starts_new_frame() {
        let mut list = DisplayList::new(640, 480);
        list.stroke_rect([1.0, 2.0, 3.0, 4.0], LIME, 2);
        list.clear();
        assert_eq!(list.ops(), &[DrawOp::Clear]);
        assert!(list.rects().is_empty());
    }
}
