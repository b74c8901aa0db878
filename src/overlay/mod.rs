//! Overlay Presentation Layer
//!
//! Draws bounding boxes, labels and pulsing markers for the latest prediction
//! list. Redraws every animation frame; the pulse is advanced by the render
//! loop and never waits on detection.

pub mod canvas;
pub mod glyphs;

use image::Rgba;

use crate::config::OverlaySettings;
use crate::detection::Prediction;
use crate::overlay::canvas::Canvas;

pub use canvas::{DisplayList, DrawOp, RasterCanvas};

/// Marker colors
const CORE_INNER: Rgba<u8> = Rgba([50, 255, 50, 255]);
const CORE_OUTER: Rgba<u8> = Rgba([0, 255, 0, 77]);
const RING: Rgba<u8> = Rgba([0, 255, 0, 77]);
const HALO_INNER: Rgba<u8> = Rgba([0, 255, 0, 51]);
const HALO_OUTER: Rgba<u8> = Rgba([0, 255, 0, 0]);

/// Per-frame animation state carried by the render loop
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnimationState {
    /// Extra halo radius on top of the marker core
    pub pulse: f32,
    /// Frames rendered so far
    pub frame: u64,
}

impl AnimationState {
    /// Sawtooth step: grow by `step` until `max` is reached, then restart at 0
    pub fn advance(self, step: f32, max: f32) -> Self {
        let pulse = if self.pulse >= max { 0.0 } else { self.pulse + step };
        Self {
            pulse,
            frame: self.frame + 1,
        }
    }
}

/// Resolved overlay styling
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub stroke_color: Rgba<u8>,
    pub line_width: u32,
    pub label_color: Rgba<u8>,
    pub marker_base_radius: f32,
    pub marker_ring_gap: f32,
    pub pulse_max: f32,
    pub pulse_step: f32,
    pub marker_offset: f32,
    pub marker_min_y: f32,
    pub label_min_y: f32,
    pub label_offset: f32,
}

impl From<&OverlaySettings> for OverlayStyle {
    fn from(settings: &OverlaySettings) -> Self {
        Self {
            stroke_color: Rgba(settings.stroke_color),
            line_width: settings.line_width,
            label_color: Rgba(settings.label_color),
            marker_base_radius: settings.marker_base_radius,
            marker_ring_gap: settings.marker_ring_gap,
            pulse_max: settings.pulse_max,
            pulse_step: settings.pulse_step,
            marker_offset: settings.marker_offset,
            marker_min_y: settings.marker_min_y,
            label_min_y: settings.label_min_y,
            label_offset: settings.label_offset,
        }
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::from(&OverlaySettings::default())
    }
}

/// Draws predictions onto a canvas sized like the capture
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Where the label baseline goes for `prediction`
    pub fn label_position(&self, prediction: &Prediction) -> (f32, f32) {
        let [x0, y0, _, _] = prediction.bbox;
        let y = if y0 > self.style.label_min_y {
            y0 - self.style.label_offset
        } else {
            self.style.label_min_y
        };
        (x0, y)
    }

    /// Marker center: above the box midpoint, kept below the top edge
    pub fn marker_center(&self, prediction: &Prediction) -> (f32, f32) {
        let y = prediction.bbox[1] - self.style.marker_offset;
        (prediction.center_x(), y.max(self.style.marker_min_y))
    }

    /// Draw one frame and return the animation state for the next one
    pub fn render_frame(
        &self,
        canvas: &mut dyn Canvas,
        predictions: &[Prediction],
        animation: AnimationState,
    ) -> AnimationState {
        canvas.clear();
        for prediction in predictions {
            self.draw_prediction(canvas, prediction, animation.pulse);
        }
        animation.advance(self.style.pulse_step, self.style.pulse_max)
    }

    fn draw_prediction(&self, canvas: &mut dyn Canvas, prediction: &Prediction, pulse: f32) {
        let style = &self.style;

        canvas.stroke_rect(prediction.bbox, style.stroke_color, style.line_width);

        let (lx, ly) = self.label_position(prediction);
        canvas.fill_text(&prediction.label(), lx, ly, style.label_color);

        let center = self.marker_center(prediction);
        let base = style.marker_base_radius;
        canvas.fill_radial(center, base, CORE_INNER, CORE_OUTER);
        canvas.stroke_circle(center, base + style.marker_ring_gap, RING, 1.0);
        canvas.fill_radial(center, base + pulse, HALO_INNER, HALO_OUTER);
    }
}
