//! In-memory stand-ins for S3 and the face models.

use crate::loader::{LoadError, ObjectLocation, ObjectStore};
use async_trait::async_trait;
use facecheck_core::analyzer::PACK_ID;
use facecheck_core::{
    AnalyzeError, BgrImage, BoundingBox, Embedding, FaceAnalyzer, FaceDetection,
};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array3;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<(String, String), Vec<u8>>,
    fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn with(mut self, bucket: &str, key: &str, bytes: Vec<u8>) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), bytes);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, LoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .cloned()
            .ok_or_else(|| LoadError::Retrieval {
                bucket: location.bucket.clone(),
                key: location.key.clone(),
                message: "NoSuchKey: The specified key does not exist.".into(),
            })
    }
}

/// PNG of a single RGB color.
pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// PNG whose blue channel is `tag`, the key [`ScriptedAnalyzer`] uses.
pub fn tagged_png(tag: u8) -> Vec<u8> {
    png_bytes(8, 8, [0, 0, tag])
}

/// Small BGR image whose blue channel is `tag`.
pub fn solid_image(tag: u8) -> BgrImage {
    BgrImage::from_array(Array3::from_shape_fn((8, 8, 3), |(_, _, c)| {
        if c == 0 {
            tag
        } else {
            0
        }
    }))
    .expect("valid shape")
}

pub fn face(width: f32, height: f32, values: Vec<f32>) -> FaceDetection {
    FaceDetection {
        bbox: BoundingBox {
            x: 0.0,
            y: 0.0,
            width,
            height,
            confidence: 0.9,
            landmarks: None,
        },
        embedding: Embedding::normalized(values, PACK_ID),
    }
}

/// Returns canned detections keyed by the blue value of the top-left pixel.
#[derive(Clone, Default)]
pub struct ScriptedAnalyzer {
    faces: HashMap<u8, Vec<FaceDetection>>,
    panic_on: Option<u8>,
}

impl ScriptedAnalyzer {
    pub fn with(mut self, tag: u8, faces: Vec<FaceDetection>) -> Self {
        self.faces.insert(tag, faces);
        self
    }

    /// Panic, as a broken inference kernel would, on images tagged `tag`.
    pub fn panicking_on(mut self, tag: u8) -> Self {
        self.panic_on = Some(tag);
        self
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn analyze(&mut self, image: &BgrImage) -> Result<Vec<FaceDetection>, AnalyzeError> {
        let tag = image.pixel(0, 0)[0];
        if self.panic_on == Some(tag) {
            panic!("index out of bounds in output tensor for tag {tag}");
        }
        Ok(self.faces.get(&tag).cloned().unwrap_or_default())
    }
}
