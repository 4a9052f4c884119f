//! BGR pixel arrays — decoding and the RGB→BGR channel conversion.

use image::RgbImage;
use ndarray::Array3;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("not a decodable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    Empty,
    #[error("pixel array must have shape (height, width, 3), got {0:?}")]
    BadShape(Vec<usize>),
}

/// An 8-bit image laid out as (height, width, channel) with channels in
/// blue-green-red order.
#[derive(Debug, Clone)]
pub struct BgrImage {
    data: Array3<u8>,
}

impl BgrImage {
    /// Wrap an existing (height, width, 3) array that is already BGR.
    pub fn from_array(data: Array3<u8>) -> Result<Self, DecodeError> {
        let shape = data.shape();
        if shape[2] != 3 {
            return Err(DecodeError::BadShape(shape.to_vec()));
        }
        if shape[0] == 0 || shape[1] == 0 {
            return Err(DecodeError::Empty);
        }
        Ok(Self { data })
    }

    /// Build from an RGB image via [`rgb_to_bgr`].
    pub fn from_rgb(rgb: &RgbImage) -> Result<Self, DecodeError> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(DecodeError::Empty);
        }
        Ok(Self {
            data: rgb_to_bgr(rgb),
        })
    }

    /// Decode encoded image bytes (JPEG, PNG, ...) of any color type.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        Self::from_rgb(&rgb)
    }

    /// Load and decode an image file from disk.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let rgb = image::open(path)?.to_rgb8();
        Self::from_rgb(&rgb)
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    /// `[b, g, r]` at column `x`, row `y`.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        [
            self.data[[y, x, 0]],
            self.data[[y, x, 1]],
            self.data[[y, x, 2]],
        ]
    }

    pub fn as_array(&self) -> &Array3<u8> {
        &self.data
    }
}

/// Reorder an RGB image into a BGR (height, width, 3) array.
///
/// Pre: `rgb` holds 8-bit red-green-blue samples.
/// Post: channel 0 is blue, 1 is green, 2 is red; dimensions are unchanged.
pub fn rgb_to_bgr(rgb: &RgbImage) -> Array3<u8> {
    let (w, h) = rgb.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[2 - c]
    })
}
