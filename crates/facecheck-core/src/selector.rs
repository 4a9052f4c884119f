//! Pick the verification subject among detected faces.

use crate::types::{Embedding, FaceDetection};

/// Choose the face with the largest bounding-box area.
///
/// Ties keep the first face encountered. Returns the winning embedding
/// together with every detection, or `(None, [])` for no detections.
/// Largest-box is a policy for multi-face images, not an identity check.
pub fn select_best(detections: Vec<FaceDetection>) -> (Option<Embedding>, Vec<FaceDetection>) {
    let mut best: Option<&FaceDetection> = None;
    for det in &detections {
        match best {
            Some(b) if det.bbox.area() <= b.bbox.area() => {}
            _ => best = Some(det),
        }
    }
    let embedding = best.map(|d| d.embedding.clone());
    (embedding, detections)
}
