//! JPEG compression of staged frames.

use bytes::Bytes;
use deskcap_core::QualityTier;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::VideoError;
use crate::pixels::{PixelBuffer, BYTES_PER_PIXEL};
use crate::VideoResult;

/// Compresses BGRA frames to baseline JPEG at a fixed quality.
#[derive(Debug)]
pub struct JpegCompressor {
    quality: u8,
}

impl JpegCompressor {
    pub fn new(tier: QualityTier) -> Self {
        Self {
            quality: tier.encoder_quality(),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn compress(&self, pixels: &PixelBuffer) -> VideoResult<Bytes> {
        let (width, height) = (pixels.width(), pixels.height());
        if width == 0 || height == 0 {
            return Err(VideoError::Encode("empty frame".to_string()));
        }

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for bgra in pixels.as_bytes().chunks_exact(BYTES_PER_PIXEL) {
            rgb.extend_from_slice(&[bgra[2], bgra[1], bgra[0]]);
        }

        let image = RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| VideoError::Encode("pixel buffer size mismatch".to_string()))?;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(&image)
            .map_err(|e| VideoError::Encode(e.to_string()))?;

        Ok(Bytes::from(jpeg))
    }
}
