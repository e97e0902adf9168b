//! Enrolled-user image storage.
//!
//! Layout on disk: `<root>/<username>/<image>.{jpg,jpeg,png}`. Enumeration is sorted
//! so gallery labels do not depend on directory iteration order.

use image::RgbImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum UserStoreError {
    #[error("invalid user name: {0:?}")]
    InvalidName(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Read access to enrolled users and their stored face images.
pub trait UserStore {
    /// Enrolled user names, sorted.
    fn list_users(&self) -> Result<Vec<String>, UserStoreError>;
    /// Paths of the user's stored images, sorted.
    fn list_images(&self, user: &str) -> Result<Vec<PathBuf>, UserStoreError>;
    fn load_image(&self, path: &Path) -> Result<RgbImage, UserStoreError>;
}

/// Filesystem-backed user store.
#[derive(Debug, Clone)]
pub struct FsUserStore {
    root: PathBuf,
}

impl FsUserStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store an enrollment capture as `<root>/<user>/img_<index>.jpg`.
    pub fn save_image(
        &self,
        user: &str,
        index: u32,
        image: &RgbImage,
    ) -> Result<PathBuf, UserStoreError> {
        let dir = self.user_dir(user)?;
        fs::create_dir_all(&dir).map_err(|source| UserStoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(format!("img_{index}.jpg"));
        image.save(&path).map_err(|source| UserStoreError::Image {
            path: path.clone(),
            source,
        })?;
        tracing::info!(user, path = %path.display(), "saved enrollment image");
        Ok(path)
    }

    /// Delete a user and all their images. Returns `false` if the user did not exist.
    pub fn remove_user(&self, user: &str) -> Result<bool, UserStoreError> {
        let dir = self.user_dir(user)?;
        if !dir.is_dir() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(|source| UserStoreError::Io {
            path: dir.clone(),
            source,
        })?;
        tracing::info!(user, "removed user");
        Ok(true)
    }

    fn user_dir(&self, user: &str) -> Result<PathBuf, UserStoreError> {
        validate_user_name(user)?;
        Ok(self.root.join(user))
    }
}

impl UserStore for FsUserStore {
    fn list_users(&self) -> Result<Vec<String>, UserStoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.root.display(), "user directory missing");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(UserStoreError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut users: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        users.sort();
        Ok(users)
    }

    fn list_images(&self, user: &str) -> Result<Vec<PathBuf>, UserStoreError> {
        let dir = self.user_dir(user)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(UserStoreError::Io { path: dir, source }),
        };

        let mut images: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        images.sort();
        Ok(images)
    }

    fn load_image(&self, path: &Path) -> Result<RgbImage, UserStoreError> {
        image::open(path)
            .map(|img| img.into_rgb8())
            .map_err(|source| UserStoreError::Image {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// User names become directory names: reject anything that could escape the root.
fn validate_user_name(user: &str) -> Result<(), UserStoreError> {
    let bad = user.is_empty()
        || user == "."
        || user == ".."
        || user.contains(['/', '\\', '\0']);
    if bad {
        Err(UserStoreError::InvalidName(user.to_string()))
    } else {
        Ok(())
    }
}
