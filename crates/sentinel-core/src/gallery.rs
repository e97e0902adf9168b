//! Enrolled-user gallery: one prototype embedding per user.
//!
//! A [`Gallery`] is immutable once built. Retraining produces a new one which is
//! swapped into a [`GalleryCell`] in a single step, so readers only ever see a
//! complete gallery or none at all.

use crate::analyzer::FaceAnalyzer;
use crate::types::Embedding;
use crate::users::UserStore;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// One enrolled user.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: u32,
    pub name: String,
    /// Mean of the user's per-image embeddings.
    pub prototype: Embedding,
    /// Number of images that contributed to the prototype.
    pub samples: usize,
}

/// Immutable label → prototype mapping, ordered by label.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(mut entries: Vec<GalleryEntry>) -> Self {
        entries.sort_by_key(|e| e.label);
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

/// Shared slot holding the current gallery, or none when no recognizer is trained.
#[derive(Debug, Default)]
pub struct GalleryCell {
    current: RwLock<Option<Arc<Gallery>>>,
}

impl GalleryCell {
    pub fn new(initial: Option<Gallery>) -> Self {
        Self {
            current: RwLock::new(initial.map(Arc::new)),
        }
    }

    /// Snapshot of the current gallery. The lock is held only to clone the `Arc`.
    pub fn load(&self) -> Option<Arc<Gallery>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a freshly built gallery (or clear it), returning the previous one.
    pub fn replace(&self, next: Option<Gallery>) -> Option<Arc<Gallery>> {
        let next = next.map(Arc::new);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    pub fn is_trained(&self) -> bool {
        self.load().is_some()
    }
}

/// Build a gallery from every enrolled user's stored images.
///
/// Each user is labelled by position in the sorted user list. For every image the
/// first detected face's embedding is kept; unreadable images, images without a
/// face, and analyzer failures are skipped. Users with no usable image get no entry.
///
/// Returns `None` when no usable embedding was found at all, which callers must
/// treat as "no recognizer" rather than an empty gallery.
pub fn build<S>(store: &S, analyzer: &Mutex<dyn FaceAnalyzer + Send>) -> Option<Gallery>
where
    S: UserStore + ?Sized,
{
    let users = match store.list_users() {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate users");
            return None;
        }
    };

    let mut entries = Vec::new();
    let mut total = 0usize;

    for (label, name) in users.into_iter().enumerate() {
        let images = match store.list_images(&name) {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(user = %name, error = %e, "failed to list user images");
                continue;
            }
        };

        tracing::info!(user = %name, images = images.len(), "loading enrollment images");

        let mut embeddings = Vec::with_capacity(images.len());
        for path in images {
            let image = match store.load_image(&path) {
                Ok(image) => image,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable image");
                    continue;
                }
            };

            let faces = {
                let mut analyzer = analyzer.lock().unwrap_or_else(PoisonError::into_inner);
                analyzer.analyze(&image)
            };
            match faces {
                Ok(faces) => match faces.into_iter().next() {
                    Some(face) => embeddings.push(face.embedding),
                    None => tracing::debug!(path = %path.display(), "no face in enrollment image"),
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "face analysis failed");
                }
            }
        }

        total += embeddings.len();
        if let Some(prototype) = Embedding::mean(&embeddings) {
            entries.push(GalleryEntry {
                label: label as u32,
                name,
                prototype,
                samples: embeddings.len(),
            });
        }
    }

    tracing::info!(embeddings = total, users = entries.len(), "gallery build finished");

    if entries.is_empty() {
        None
    } else {
        Some(Gallery::new(entries))
    }
}
