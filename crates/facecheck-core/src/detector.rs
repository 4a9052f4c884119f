//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD-10GF model from the `buffalo_l` pack with 3-stride
//! anchor-free decoding and NMS post-processing. Input is a BGR image;
//! the network itself consumes RGB, so channels are swapped while filling
//! the input tensor.

use crate::pixels::BgrImage;
use crate::types::BoundingBox;
use ndarray::{Array3, Array4, ArrayView3};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector settings. Defaults match the `buffalo_l` preparation used by
/// the verification service: 800×800 input, 0.3 score threshold.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub input_size: usize,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 800,
            confidence_threshold: 0.3,
            nms_threshold: 0.4,
            intra_threads: 2,
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    config: DetectorConfig,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            input_size = config.input_size,
            threshold = config.confidence_threshold,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            config,
            stride_indices,
        })
    }

    /// Detect faces, returning bounding boxes sorted by confidence.
    pub fn detect(&mut self, image: &BgrImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let size = self.config.input_size;
        let (input, letterbox) = preprocess(image, size);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                StrideOutputs { scores, bboxes, kps },
                stride,
                size,
                &letterbox,
                self.config.confidence_threshold,
            ));
        }

        let mut result = nms(all_detections, self.config.nms_threshold);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

/// Letterbox a BGR image into a square RGB NCHW tensor of side `size`.
///
/// The image keeps its aspect ratio and is centred; padding uses
/// `SCRFD_MEAN` so it normalizes to 0.0.
fn preprocess(image: &BgrImage, size: usize) -> (Array4<f32>, LetterboxInfo) {
    let width = image.width();
    let height = image.height();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    // whole-pixel offsets; decoding must subtract exactly what was placed
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = resize_bilinear(image.as_array().view(), new_w, new_h);

    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), 0.0);
    for y in 0..new_h {
        for x in 0..new_w {
            for c in 0..3 {
                // BGR source → RGB tensor plane
                let pixel = resized[[y, x, 2 - c]] as f32;
                tensor[[0, c, y + pad_y, x + pad_x]] = (pixel - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    let info = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, info)
}

/// Bilinear resize of a (height, width, channels) u8 array.
fn resize_bilinear(src: ArrayView3<u8>, new_w: usize, new_h: usize) -> Array3<u8> {
    let (height, width, channels) = src.dim();
    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;

    let mut out = Array3::<u8>::zeros((new_h, new_w, channels));
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..channels {
                let val = src[[y0, x0, c]] as f32 * (1.0 - fx) * (1.0 - fy)
                    + src[[y0, x1, c]] as f32 * fx * (1.0 - fy)
                    + src[[y1, x0, c]] as f32 * (1.0 - fx) * fy
                    + src[[y1, x1, c]] as f32 * fx * fy;
                out[[y, x, c]] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// Discover output tensor ordering by name.
///
/// Exports either name tensors `score_8`, `bbox_16`, `kps_32`, ... or use
/// generic numeric names. The latter fall back to the positional layout
/// `[0-2]` scores, `[3-5]` bboxes, `[6-8]` kps, which is what `det_10g.onnx`
/// ships with.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0, 0); 3];
    for (slot, &stride) in named.iter_mut().zip(SCRFD_STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => *slot = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD: output names not recognized, using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

/// Raw output slices of one stride level.
struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode detections for a single stride level.
fn decode_stride(
    out: StrideOutputs<'_>,
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = out.scores.get(idx).copied().unwrap_or(0.0);
        if score < threshold {
            continue;
        }

        let bbox_off = idx * 4;
        if bbox_off + 3 >= out.bboxes.len() {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * s;
        let anchor_cy = (cell / grid) as f32 * s;

        // Distances to the box edges, in stride units
        let x1 = unmap(anchor_cx - out.bboxes[bbox_off] * s, letterbox.pad_x);
        let y1 = unmap(anchor_cy - out.bboxes[bbox_off + 1] * s, letterbox.pad_y);
        let x2 = unmap(anchor_cx + out.bboxes[bbox_off + 2] * s, letterbox.pad_x);
        let y2 = unmap(anchor_cy + out.bboxes[bbox_off + 3] * s, letterbox.pad_y);

        let kps_off = idx * 10;
        let landmarks = (kps_off + 9 < out.kps.len()).then(|| {
            std::array::from_fn(|i| {
                (
                    unmap(anchor_cx + out.kps[kps_off + i * 2] * s, letterbox.pad_x),
                    unmap(anchor_cy + out.kps[kps_off + i * 2 + 1] * s, letterbox.pad_y),
                )
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
