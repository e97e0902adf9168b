//! Face analysis: detection followed by embedding extraction.
//!
//! The rest of the crate only sees [`FaceAnalyzer`]: an image goes in, a list of
//! (bounding box, embedding) pairs comes out. [`OnnxFaceAnalyzer`] is the production
//! implementation backed by SCRFD and ArcFace.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Black-box face analysis: image in, detected faces with embeddings out.
///
/// Faces are returned in descending detection confidence.
pub trait FaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

/// SCRFD detection + ArcFace embedding via ONNX Runtime.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load both models from `model_dir` (`det_10g.onnx`, `w600k_r50.onnx`).
    ///
    /// `detection_size` is the square SCRFD input edge (320 or 640 are typical).
    pub fn load(model_dir: &Path, detection_size: usize) -> Result<Self, AnalyzerError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy(), detection_size)?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let embedding = match self.recognizer.extract(image, &bbox) {
                Ok(embedding) => embedding,
                // A box the detector could not landmark cannot be aligned; skip it.
                Err(RecognizerError::NoLandmarks) => continue,
                Err(e) => return Err(e.into()),
            };
            faces.push(DetectedFace { bbox, embedding });
        }

        Ok(faces)
    }
}
