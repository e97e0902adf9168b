//! Recognition orchestration: analyze a frame, match each face against the
//! gallery, and produce an annotated copy plus per-face results.

use crate::analyzer::FaceAnalyzer;
use crate::annotate::Annotator;
use crate::gallery::{Gallery, GalleryEntry};
use crate::types::{DetectedFace, Embedding, FaceMatch, Identity};
use image::RgbImage;
use std::sync::{Mutex, PoisonError};

/// Default cosine-similarity threshold for a positive identification.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;

/// Output of one recognition pass.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub annotated: RgbImage,
    pub matches: Vec<FaceMatch>,
}

/// Highest-scoring gallery entry for `embedding`.
///
/// Entries are scanned in label order and only a strictly greater score replaces
/// the current best, so the first of several equal maxima wins.
pub fn best_match<'g>(embedding: &Embedding, gallery: &'g Gallery) -> Option<(&'g GalleryEntry, f32)> {
    let mut best: Option<(&GalleryEntry, f32)> = None;
    for entry in gallery.entries() {
        let score = embedding.similarity(&entry.prototype);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((entry, score)),
        }
    }
    best
}

/// Matches detected faces against a gallery and draws the result.
pub struct Matcher {
    threshold: f32,
    annotator: Annotator,
}

impl Matcher {
    pub fn new(threshold: f32, annotator: Annotator) -> Self {
        Self {
            threshold,
            annotator,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Resolve one embedding to an identity.
    ///
    /// Recognized only when the best score is strictly above the threshold. With no
    /// gallery, or an empty one, the face is unknown and no score is reported.
    pub fn classify(&self, embedding: &Embedding, gallery: Option<&Gallery>) -> (Identity, Option<f32>) {
        let Some((entry, score)) = gallery.and_then(|g| best_match(embedding, g)) else {
            return (Identity::Unknown, None);
        };

        if score > self.threshold {
            (
                Identity::Known {
                    label: entry.label,
                    name: entry.name.clone(),
                },
                Some(score),
            )
        } else {
            (Identity::Unknown, Some(score))
        }
    }

    /// Classify already-analyzed faces and annotate `frame`.
    pub fn match_faces(
        &self,
        frame: &RgbImage,
        faces: &[DetectedFace],
        gallery: Option<&Gallery>,
    ) -> Recognition {
        let matches: Vec<FaceMatch> = faces
            .iter()
            .map(|face| {
                let (identity, score) = self.classify(&face.embedding, gallery);
                FaceMatch {
                    identity,
                    score,
                    rect: face.bbox.to_rect(),
                }
            })
            .collect();

        let annotated = if matches.is_empty() {
            frame.clone()
        } else {
            self.annotator.annotate(frame, &matches)
        };

        Recognition { annotated, matches }
    }

    /// Full pass: run the analyzer on `frame`, then match and annotate.
    ///
    /// An analyzer failure is logged and treated as a frame with no faces.
    pub fn recognize(
        &self,
        frame: &RgbImage,
        analyzer: &Mutex<dyn FaceAnalyzer + Send>,
        gallery: Option<&Gallery>,
    ) -> Recognition {
        let faces = {
            let mut analyzer = analyzer.lock().unwrap_or_else(PoisonError::into_inner);
            analyzer.analyze(frame)
        };
        let faces = faces.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "face analysis failed; treating frame as empty");
            Vec::new()
        });

        let recognition = self.match_faces(frame, &faces, gallery);
        tracing::debug!(
            faces = recognition.matches.len(),
            known = recognition.matches.iter().filter(|m| m.is_known()).count(),
            "frame recognized"
        );
        recognition
    }
}
