//! Raster images as PDF Image XObjects.
//!
//! Any format the `image` crate decodes (PNG, JPEG, TIFF here) is converted to
//! 8-bit DeviceRGB samples. A non-opaque alpha channel becomes a separate
//! DeviceGray soft mask. Both are Flate-compressed.

use crate::object::{Dict, Object, ObjectRef};
use std::io::Write;

/// Decoded, compressed image ready for embedding.
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Flate-compressed RGB samples
    pub data: Vec<u8>,
    /// Flate-compressed alpha samples, when the image is not fully opaque
    pub soft_mask: Option<Vec<u8>>,
}

/// Image embedding error.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// The raster could not be decoded
    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    /// The raster decoded to zero pixels
    #[error("Image has zero width or height")]
    Empty,

    /// Failed to compress image data
    #[error("Compression error: {0}")]
    CompressionError(String),
}

impl ImageData {
    /// Decode an image from its encoded bytes, detecting the format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let img =
            image::load_from_memory(bytes).map_err(|e| ImageError::DecodeError(e.to_string()))?;
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(ImageError::Empty);
        }

        let rgba = img.to_rgba8();
        let pixels = (width as usize) * (height as usize);
        let mut rgb = Vec::with_capacity(pixels * 3);
        let mut alpha = Vec::with_capacity(pixels);
        for pixel in rgba.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }

        let soft_mask = if alpha.iter().all(|&a| a == u8::MAX) {
            None
        } else {
            Some(compress(&alpha)?)
        };

        log::debug!(
            "decoded {}x{} image ({} alpha)",
            width,
            height,
            if soft_mask.is_some() { "with" } else { "no" }
        );

        Ok(Self {
            width,
            height,
            data: compress(&rgb)?,
            soft_mask,
        })
    }

    /// Width / height.
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    fn base_dict(&self, color_space: &str) -> Dict {
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::name("XObject"));
        dict.insert("Subtype".to_string(), Object::name("Image"));
        dict.insert("Width".to_string(), Object::Integer(self.width as i64));
        dict.insert("Height".to_string(), Object::Integer(self.height as i64));
        dict.insert("ColorSpace".to_string(), Object::name(color_space));
        dict.insert("BitsPerComponent".to_string(), Object::Integer(8));
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        dict
    }

    /// The Image XObject stream, pointing at `soft_mask` when given.
    pub fn xobject(&self, soft_mask: Option<ObjectRef>) -> Object {
        let mut dict = self.base_dict("DeviceRGB");
        if let Some(mask) = soft_mask {
            dict.insert("SMask".to_string(), Object::Reference(mask));
        }
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.data.clone()),
        }
    }

    /// The soft-mask stream, if the image has transparency.
    pub fn soft_mask_xobject(&self) -> Option<Object> {
        self.soft_mask.as_ref().map(|mask| Object::Stream {
            dict: self.base_dict("DeviceGray"),
            data: bytes::Bytes::from(mask.clone()),
        })
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| ImageError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ImageError::CompressionError(e.to_string()))
}
