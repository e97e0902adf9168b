//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the `det_10g` SCRFD model on RGB frames: top-left letterbox into a square
//! input, anchor-free decoding over three strides, then NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// Output layout of the insightface export: [scores × 3, bboxes × 3, kps × 3].
const SCRFD_OUTPUTS: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download buffalo_l from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("invalid detection size {0}: must be a positive multiple of 32")]
    InvalidInputSize(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model with a square input of `input_size` pixels.
    pub fn load(model_path: &str, input_size: usize) -> Result<Self, DetectorError> {
        if input_size == 0 || input_size % 32 != 0 {
            return Err(DetectorError::InvalidInputSize(input_size));
        }
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = model_path,
            input_size,
            outputs = num_outputs,
            "loaded SCRFD model"
        );

        if num_outputs < SCRFD_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires {SCRFD_OUTPUTS} outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        Ok(Self {
            session,
            input_size,
        })
    }

    /// Detect faces in an RGB frame, returning boxes sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, scale) = preprocess(image, self.input_size);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(level, "scores")?;
            let bboxes = extract(level + 3, "bboxes")?;
            let kps = extract(level + 6, "kps")?;

            detections.extend(decode_stride(
                StrideOutputs { scores, bboxes, kps },
                stride,
                self.input_size,
                scale,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(detections, SCRFD_NMS_THRESHOLD))
    }
}

/// Resize the frame to fit a `size`×`size` canvas anchored top-left, padding with black,
/// and normalize into an NCHW tensor. Returns the tensor and the applied scale.
fn preprocess(image: &RgbImage, size: usize) -> (Array4<f32>, f32) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size as u32);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad = (0.0 - SCRFD_MEAN) / SCRFD_STD;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), pad);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, scale)
}

struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode detections for one stride level back into original frame coordinates.
fn decode_stride(
    out: StrideOutputs<'_>,
    stride: usize,
    input_size: usize,
    scale: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = out.scores.get(idx).copied().unwrap_or(0.0);
        if score < threshold {
            continue;
        }

        let Some(d) = out.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * s;
        let cy = (cell / grid) as f32 * s;

        let x1 = (cx - d[0] * s) / scale;
        let y1 = (cy - d[1] * s) / scale;
        let x2 = (cx + d[2] * s) / scale;
        let y2 = (cy + d[3] * s) / scale;

        let landmarks = out.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| ((cx + k[i * 2] * s) / scale, (cy + k[i * 2 + 1] * s) / scale))
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

/// Greedy non-maximum suppression; output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_highest_of_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_preprocess_letterbox_top_left() {
        let image = RgbImage::from_pixel(64, 32, Rgb([255, 255, 255]));
        let (tensor, scale) = preprocess(&image, 128);

        assert_eq!(tensor.shape(), &[1, 3, 128, 128]);
        assert!((scale - 2.0).abs() < 1e-6);

        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        let black = (0.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 0, 0]] - white).abs() < 0.01);
        assert!((tensor[[0, 2, 63, 127]] - white).abs() < 0.01);
        // Below the resized content is padding.
        assert!((tensor[[0, 1, 64, 0]] - black).abs() < 1e-6);
        assert!((tensor[[0, 1, 127, 127]] - black).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        let input_size = 64;
        let stride = 32;
        let grid = input_size / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // Anchor 3 → cell 1 → (cx, cy) = (32, 0) in input space.
        scores[3] = 0.9;
        bboxes[12..16].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let dets = decode_stride(
            StrideOutputs { scores: &scores, bboxes: &bboxes, kps: &kps },
            stride,
            input_size,
            2.0,
            0.5,
        );

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 8.0).abs() < 1e-5, "x = {}", d.x);
        assert!((d.y - 0.0).abs() < 1e-5);
        assert!((d.width - 16.0).abs() < 1e-5);
        assert!((d.height - 16.0).abs() < 1e-5);
        assert_eq!(d.landmarks.unwrap()[0], (16.0, 0.0));
    }

    #[test]
    fn test_decode_stride_threshold() {
        let scores = vec![0.49f32; 8];
        let bboxes = vec![1.0f32; 32];
        let dets = decode_stride(
            StrideOutputs { scores: &scores, bboxes: &bboxes, kps: &[] },
            32,
            64,
            1.0,
            0.5,
        );
        assert!(dets.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_input_size() {
        assert!(matches!(
            FaceDetector::load("/nonexistent.onnx", 100),
            Err(DetectorError::InvalidInputSize(100))
        ));
        assert!(matches!(
            FaceDetector::load("/nonexistent.onnx", 320),
            Err(DetectorError::ModelNotFound(_))
        ));
    }
}
