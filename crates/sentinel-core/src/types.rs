use serde::{Deserialize, Serialize};

/// Display name reported for faces that match no enrolled user.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Bounding box for a detected face, with optional facial landmarks.
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
    /// Integer pixel rectangle covering this box, truncated like the detector's corner output.
    pub fn to_rect(&self) -> FaceRect {
        let x1 = self.x as i32;
        let y1 = self.y as i32;
        let x2 = (self.x + self.width) as i32;
        let y2 = (self.y + self.height) as i32;
        FaceRect {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0) as u32,
            height: (y2 - y1).max(0) as u32,
        }
    }
}

/// Pixel-space face rectangle reported to consumers: (x, y, width, height).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity `(a·b) / (‖a‖·‖b‖)`, in [-1, 1].
    ///
    /// A zero-length vector on either side yields 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Element-wise mean of a set of embeddings.
    ///
    /// Returns `None` for an empty set or when the dimensions disagree.
    pub fn mean(embeddings: &[Embedding]) -> Option<Embedding> {
        let first = embeddings.first()?;
        let dim = first.values.len();
        if embeddings.iter().any(|e| e.values.len() != dim) {
            return None;
        }

        let mut sum = vec![0.0f64; dim];
        for embedding in embeddings {
            for (acc, v) in sum.iter_mut().zip(&embedding.values) {
                *acc += f64::from(*v);
            }
        }

        let n = embeddings.len() as f64;
        Some(Embedding {
            values: sum.into_iter().map(|v| (v / n) as f32).collect(),
            model_version: first.model_version.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One face found by a [`FaceAnalyzer`](crate::analyzer::FaceAnalyzer): where it is and its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Who a face was resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identity {
    Known { label: u32, name: String },
    Unknown,
}

impl Identity {
    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            Identity::Known { name, .. } => name,
            Identity::Unknown => UNKNOWN_NAME,
        }
    }
}

/// Per-face recognition outcome for a single frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMatch {
    pub identity: Identity,
    /// Best cosine similarity against the gallery; `None` when no comparison was made
    /// (no gallery, or an empty one).
    pub score: Option<f32>,
    pub rect: FaceRect,
}

impl FaceMatch {
    pub fn is_known(&self) -> bool {
        self.identity.is_known()
    }

    /// Overlay label: `"<name> (<score>)"`, with `--` when no comparison was made.
    pub fn label(&self) -> String {
        match self.score {
            Some(score) => format!("{} ({score:.2})", self.identity.name()),
            None => format!("{} (--)", self.identity.name()),
        }
    }
}
