//! CPU-side pixel storage for staged frames.

use crate::error::VideoError;
use crate::VideoResult;

/// Bytes per BGRA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// A tightly packed BGRA frame.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    /// Allocates a black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Copies `height` rows out of a mapped surface whose rows are `src_pitch`
    /// bytes apart. Padding at the end of each source row is skipped.
    pub fn copy_rows(&mut self, src: &[u8], src_pitch: usize) -> VideoResult<()> {
        let row_bytes = self.stride();
        let rows = self.height as usize;
        if rows == 0 || row_bytes == 0 {
            return Ok(());
        }

        if src_pitch < row_bytes {
            return Err(VideoError::Staging(format!(
                "row pitch {src_pitch} is smaller than row size {row_bytes}"
            )));
        }

        let required = src_pitch * (rows - 1) + row_bytes;
        if src.len() < required {
            return Err(VideoError::Staging(format!(
                "mapped surface holds {} bytes, need {required}",
                src.len()
            )));
        }

        for (row, dst) in self.data.chunks_exact_mut(row_bytes).enumerate() {
            let start = row * src_pitch;
            dst.copy_from_slice(&src[start..start + row_bytes]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_rows_skips_padding() {
        // 2x2 BGRA with 12-byte pitch (4 bytes of padding per row).
        let mut src = vec![0xEEu8; 24];
        src[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        src[12..20].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let mut buffer = PixelBuffer::new(2, 2);
        buffer.copy_rows(&src, 12).unwrap();
        assert_eq!(buffer.as_bytes(), &(1..=16).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn test_copy_rows_allows_short_last_row() {
        // The last row of a mapped surface need not carry padding.
        let src = vec![7u8; 12 + 8];
        let mut buffer = PixelBuffer::new(2, 2);
        assert!(buffer.copy_rows(&src, 12).is_ok());
    }

    #[test]
    fn test_copy_rows_rejects_bad_pitch() {
        let mut buffer = PixelBuffer::new(4, 2);
        assert!(buffer.copy_rows(&[0; 64], 8).is_err());
        assert!(buffer.copy_rows(&[0; 20], 16).is_err());
    }
}
