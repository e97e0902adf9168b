//! Intruder evidence persistence.

use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("cannot create evidence directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write evidence image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Persists snapshot images when an alert fires.
pub trait EvidenceStore {
    /// Store `image` and return the path it was written to.
    fn persist(&self, image: &RgbImage) -> Result<PathBuf, EvidenceError>;
}

/// Writes `intruder_<YYYYMMDD_HHMMSS>.jpg` files into a directory.
#[derive(Debug, Clone)]
pub struct FsEvidenceStore {
    dir: PathBuf,
}

impl FsEvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist with an explicit local timestamp.
    pub fn persist_at(&self, image: &RgbImage, at: NaiveDateTime) -> Result<PathBuf, EvidenceError> {
        fs::create_dir_all(&self.dir).map_err(|source| EvidenceError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.free_path(&at.format("intruder_%Y%m%d_%H%M%S").to_string());
        image.save(&path).map_err(|source| EvidenceError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), "intruder evidence saved");
        Ok(path)
    }

    /// First of `<stem>.jpg`, `<stem>_1.jpg`, `<stem>_2.jpg`, ... that does not exist yet.
    fn free_path(&self, stem: &str) -> PathBuf {
        let first = self.dir.join(format!("{stem}.jpg"));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| self.dir.join(format!("{stem}_{n}.jpg")))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }
}

impl EvidenceStore for FsEvidenceStore {
    fn persist(&self, image: &RgbImage) -> Result<PathBuf, EvidenceError> {
        self.persist_at(image, Local::now().naive_local())
    }
}
