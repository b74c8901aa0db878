//! Capture Layer
//!
//! Supplies still frames to the detection timer. A source may report that it
//! is not ready yet, in which case the tick is skipped without a request.

pub mod frame;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::capture::frame::CapturedFrame;

/// Something that can hand out the current frame of a live stream
pub trait CaptureSource: Send {
    /// Grab the current frame, or `None` while the stream is not ready
    fn grab(&mut self) -> Result<Option<CapturedFrame>>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Repeats a single decoded image forever
pub struct StillImageSource {
    frame: CapturedFrame,
    label: String,
}

impl StillImageSource {
    /// Decode an image file into a still source
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to load capture image: {:?}", path))?
            .to_rgba8();
        info!("Loaded still capture {:?} ({}x{})", path, image.width(), image.height());
        Ok(Self {
            frame: CapturedFrame::from_image(image),
            label: path.display().to_string(),
        })
    }

    /// Wrap an in-memory frame
    pub fn from_frame(frame: CapturedFrame) -> Self {
        let label = format!("memory {}x{}", frame.width, frame.height);
        Self { frame, label }
    }
}

impl CaptureSource for StillImageSource {
    fn grab(&mut self) -> Result<Option<CapturedFrame>> {
        let mut frame = self.frame.clone();
        frame.timestamp = std::time::Instant::now();
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("still image {}", self.label)
    }
}

/// Cycles through the image files of a directory, one per grab
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    /// Image extensions picked up from the directory
    const EXTENSIONS: [&'static str; 4] = ["png", "jpg", "jpeg", "bmp"];

    /// Scan a directory for image files (sorted by name)
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read capture directory {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| Self::EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            anyhow::bail!("No image files found in {:?}", dir);
        }
        info!("Image sequence {:?}: {} frames", dir, files.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl CaptureSource for ImageSequenceSource {
    fn grab(&mut self) -> Result<Option<CapturedFrame>> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let image = image::open(path)
            .with_context(|| format!("Failed to decode sequence frame {:?}", path))?
            .to_rgba8();
        debug!("Captured {:?}", path);
        Ok(Some(CapturedFrame::from_image(image)))
    }

    fn describe(&self) -> String {
        format!("image sequence {} ({} frames)", self.dir.display(), self.files.len())
    }
}

/// Open a file as a still source, or a directory as a sequence
pub fn open_source(path: &Path) -> Result<Box<dyn CaptureSource>> {
    if path.is_dir() {
        Ok(Box::new(ImageSequenceSource::open(path)?))
    } else {
        Ok(Box::new(StillImageSource::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_still_source_repeats_frame() {
        let frame = CapturedFrame::from_image(RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 255])));
        let mut source = StillImageSource::from_frame(frame);

        let a = source.grab().unwrap().unwrap();
        let b = source.grab().unwrap().unwrap();
        assert_eq!(a.dimensions(), (4, 3));
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_sequence_source_cycles_sorted_files() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let sizes: Vec<_> = (0..3)
            .map(|_| source.grab().unwrap().unwrap().dimensions())
            .collect();
        assert_eq!(sizes, vec![(3, 3), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_sequence_source_rejects_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path()).is_err());
    }
}
