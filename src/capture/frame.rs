//! Frame data structures for captured camera content

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use std::time::Instant;

use crate::detection::DetectionError;

/// A still frame taken from a capture source
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Create a frame from a decoded RGBA image
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy the pixels into an image buffer
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Rasterize the frame into a JPEG buffer for submission
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, DetectionError> {
        let image = self
            .to_image()
            .ok_or_else(|| DetectionError::Encode(format!(
                "frame buffer holds {} bytes, expected {}x{} RGBA",
                self.data.len(),
                self.width,
                self.height
            )))?;

        let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|err| DetectionError::Encode(err.to_string()))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jpeg_produces_jpeg_magic() {
        let frame = CapturedFrame::from_image(RgbaImage::from_pixel(8, 6, image::Rgba([10, 200, 30, 255])));
        let jpeg = frame.encode_jpeg(85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(frame.dimensions(), (8, 6));
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = CapturedFrame::new(vec![0; 10], 8, 6);
        assert!(matches!(frame.encode_jpeg(85), Err(DetectionError::Encode(_))));
    }
}
