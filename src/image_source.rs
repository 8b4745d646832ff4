//! Image sources for the demo.
//!
//! - `Raster`: a decoded image, e.g. an uploaded file
//! - `Synthetic`: a generated placeholder scene of given dimensions
//!
//! Dimensions of zero are representable on purpose; the generator rejects them.

use anyhow::{anyhow, Result};
use image::{Rgba, RgbaImage};
use std::path::Path;

#[derive(Clone, Debug)]
pub enum ImageSource {
    Raster { name: String, image: RgbaImage },
    Synthetic { name: String, width: u32, height: u32 },
}

impl ImageSource {
    /// Decode an image file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| anyhow!("failed to open image {}: {}", path.display(), e))?
            .to_rgba8();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        log::info!("loaded image {} ({}x{})", name, image.width(), image.height());
        Ok(Self::Raster { name, image })
    }

    pub fn from_image(name: impl Into<String>, image: RgbaImage) -> Self {
        Self::Raster {
            name: name.into(),
            image,
        }
    }

    pub fn synthetic(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::Synthetic {
            name: name.into(),
            width,
            height,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Raster { name, .. } | Self::Synthetic { name, .. } => name,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Raster { image, .. } => image.dimensions(),
            Self::Synthetic { width, height, .. } => (*width, *height),
        }
    }

    /// Pixels to draw. Synthetic sources render a soft gradient "scene".
    pub fn to_rgba(&self) -> RgbaImage {
        match self {
            Self::Raster { image, .. } => image.clone(),
            Self::Synthetic { width, height, .. } => synthetic_scene(*width, *height),
        }
    }
}

/// Sky-to-ground gradient with a horizon band; cheap and recognisable.
fn synthetic_scene(width: u32, height: u32) -> RgbaImage {
    let horizon = height / 2;
    RgbaImage::from_fn(width, height, |x, y| {
        let shade = if width > 1 { (x * 40 / (width - 1)) as u8 } else { 0 };
        if y < horizon {
            let t = if horizon > 0 { (y * 80 / horizon) as u8 } else { 0 };
            Rgba([90 + t / 2, 140 + t / 2, 200 - shade, 255])
        } else {
            let t = ((y - horizon) * 60 / (height - horizon).max(1)) as u8;
            Rgba([70 + shade, 90 + t / 2, 60 + t / 3, 255])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_dimensions_and_pixels() {
        let source = ImageSource::synthetic("scene", 64, 48);
        assert_eq!(source.dimensions(), (64, 48));
        let pixels = source.to_rgba();
        assert_eq!(pixels.dimensions(), (64, 48));
        assert!(pixels.pixels().all(|p| p.0[3] == 255));
        assert_ne!(pixels.get_pixel(0, 0), pixels.get_pixel(0, 47));
    }

    #[test]
    fn zero_sized_synthetic_is_representable() {
        let source = ImageSource::synthetic("empty", 0, 10);
        assert_eq!(source.dimensions(), (0, 10));
        assert_eq!(source.to_rgba().dimensions(), (0, 10));
    }

    #[test]
    fn open_round_trips_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])).save(&path).unwrap();
        let source = ImageSource::open(&path).unwrap();
        assert_eq!(source.name(), "tiny.png");
        assert_eq!(source.dimensions(), (3, 2));
    }

    #[test]
    fn open_missing_file_fails() {
        assert!(ImageSource::open("/nonexistent/picture.png").is_err());
    }
}
