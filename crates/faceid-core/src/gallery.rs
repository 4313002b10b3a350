//! Reference galleries loaded from a directory of image files.

use crate::types::RawImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("reading gallery: {0}")]
    Io(#[from] std::io::Error),
}

/// Reference images for one identity, in a fixed verification order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    ids: Vec<String>,
    images: Vec<RawImage>,
}

impl Gallery {
    /// Load every regular, non-hidden file in `dir`, ordered by file name.
    ///
    /// Files are not decoded here; undecodable entries surface as
    /// preprocessing errors during verification.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, GalleryError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(GalleryError::NotADirectory(dir.to_path_buf()));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type()?.is_file() {
                continue;
            }
            paths.push((name, entry.path()));
        }
        paths.sort_by(|a, b| a.0.cmp(&b.0));

        let mut gallery = Self::default();
        for (name, path) in paths {
            gallery.push(name, RawImage::open(&path)?);
        }

        tracing::info!(dir = %dir.display(), references = gallery.len(), "gallery loaded");
        Ok(gallery)
    }

    pub fn push(&mut self, id: impl Into<String>, image: RawImage) {
        self.ids.push(id.into());
        self.images.push(image);
    }

    /// Identifiers, index-aligned with [`images`](Self::images).
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn images(&self) -> &[RawImage] {
        &self.images
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<RawImage>) {
        (self.ids, self.images)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("faceid-gallery-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_dir_sorted_by_name() {
        let dir = scratch_dir("sorted");
        for name in ["c.jpg", "a.jpg", "b.jpg"] {
            std::fs::write(dir.join(name), name.as_bytes()).unwrap();
        }

        let gallery = Gallery::load_dir(&dir).unwrap();
        assert_eq!(gallery.ids(), &["a.jpg", "b.jpg", "c.jpg"]);
        let RawImage::Encoded(bytes) = &gallery.images()[0] else {
            panic!("gallery images should stay encoded");
        };
        assert_eq!(bytes.as_slice(), b"a.jpg");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_dir_skips_hidden_and_subdirectories() {
        let dir = scratch_dir("skips");
        std::fs::write(dir.join(".DS_Store"), b"x").unwrap();
        std::fs::create_dir(dir.join("nested")).unwrap();
        std::fs::write(dir.join("face.jpg"), b"x").unwrap();

        let gallery = Gallery::load_dir(&dir).unwrap();
        assert_eq!(gallery.ids(), &["face.jpg"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_empty_dir() {
        let dir = scratch_dir("empty");
        let gallery = Gallery::load_dir(&dir).unwrap();
        assert!(gallery.is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_dir() {
        let result = Gallery::load_dir("/nonexistent/verification_images");
        assert!(matches!(result, Err(GalleryError::NotADirectory(_))));
    }
}
