//! Image decoding into raw pixels before GPU upload.
//! 8-bit gray, gray+alpha, RGB and RGBA images keep their channel layout;
//! anything else (16-bit, float) is converted to RGBA8.

use std::path::Path;

use image::DynamicImage;

use crate::error::DecodeError;

/// Decoded pixel data in CPU-friendly form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 8, 16, 24 or 32.
    pub bits_per_pixel: u32,
}

impl DecodedImage {
    /// Decode an image file; the format is taken from the file contents.
    pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        log::debug!("Decoding image {:?}", path);

        let img = image::open(path).map_err(|source| DecodeError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_dynamic(img))
    }

    /// Decode an encoded image (PNG, JPEG) held in memory.
    pub fn decode_memory(bytes: &[u8]) -> Result<Self, DecodeError> {
        let img = image::load_from_memory(bytes).map_err(DecodeError::Memory)?;
        Ok(Self::from_dynamic(img))
    }

    fn from_dynamic(img: DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        let (bits_per_pixel, data) = match img {
            DynamicImage::ImageLuma8(buf) => (8, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (16, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (24, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (32, buf.into_raw()),
            other => (32, other.to_rgba8().into_raw()),
        };

        log::debug!("Decoded image {}x{} at {} bpp", width, height, bits_per_pixel);

        Self {
            data,
            width,
            height,
            bits_per_pixel,
        }
    }

    /// Get the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bits_per_pixel / 8
    }

    /// Check if the pixel buffer matches the recorded dimensions.
    pub fn is_valid(&self) -> bool {
        let expected_size = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|texels| texels.checked_mul(self.bytes_per_pixel() as usize));
        self.width > 0 && self.height > 0 && expected_size == Some(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn encoded_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    #[test]
    fn rgb_png_keeps_three_channels() {
        let decoded = DecodedImage::decode_memory(&encoded_png(4, 2)).expect("decode");
        assert_eq!((decoded.width, decoded.height), (4, 2));
        assert_eq!(decoded.bits_per_pixel, 24);
        assert!(decoded.is_valid());
        // pixel (1, 1) = [1, 1, 7]
        let offset = (4 + 1) * 3;
        assert_eq!(&decoded.data[offset..offset + 3], &[1, 1, 7]);
    }

    #[test]
    fn oversized_dimensions_are_invalid() {
        let image = DecodedImage {
            data: vec![0; 16],
            width: u32::MAX,
            height: u32::MAX,
            bits_per_pixel: 32,
        };
        assert!(!image.is_valid());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = DecodedImage::decode_memory(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DecodeError::Memory(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = DecodedImage::decode_file("/nonexistent/wood.png").unwrap_err();
        match err {
            DecodeError::File { path, .. } => assert!(path.ends_with("wood.png")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
