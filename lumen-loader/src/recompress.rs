//! Last-resort recompression of fetched images.

use image::GenericImageView;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::error::RecompressError;
use crate::resource::Recompressor;

/// Downscales to a bounded longest edge and re-encodes as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct ImageRecompressor {
    quality: u8,
}

impl ImageRecompressor {
    pub const DEFAULT_QUALITY: u8 = 85;

    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for ImageRecompressor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUALITY)
    }
}

impl Recompressor for ImageRecompressor {
    fn recompress(&self, bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, RecompressError> {
        let image = image::load_from_memory(bytes)?;
        let (width, height) = image.dimensions();
        let max_dimension = max_dimension.max(1);

        // resize() keeps the aspect ratio inside the bounding box
        let image = if width.max(height) > max_dimension {
            image.resize(max_dimension, max_dimension, FilterType::Triangle)
        } else {
            image
        };

        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        image.to_rgb8().write_with_encoder(encoder)?;
        Ok(out)
    }
}
