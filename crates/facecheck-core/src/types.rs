use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
///
/// `width` and `height` are the raw differences `x2 - x1` and `y2 - y1`
/// of the decoded corners. They are never clamped to the image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Area of the box, `width * height`.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Unit-normalized face embedding (512-dimensional for glintr100).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Detector/recognizer pack that produced this embedding.
    /// Embeddings are only comparable within the same pack.
    pub pack: String,
}

impl Embedding {
    /// L2-normalize `raw` and tag it with `pack`.
    ///
    /// A zero vector is kept as-is rather than producing NaNs.
    pub fn normalized(raw: Vec<f32>, pack: impl Into<String>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self {
            values,
            pack: pack.into(),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// One face found in an image: where it is, and who it looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}
