//! Enrollment: turn a new identity's photos into gallery embeddings.

use crate::detector::{crop_face, FaceDetector};
use crate::gallery::{Gallery, GalleryError, GalleryStore};
use crate::recognizer::FaceEmbedder;
use crate::roster::parse_folder_name;
use crate::types::{Embedding, Identity};
use image::GrayImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions picked up from a dataset folder (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("read dataset folder {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("folder {0:?} is not named <name>_<id>")]
    InvalidFolder(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnrollResult {
    pub processed: usize,
    pub failed: usize,
}

/// Runs detector + embedder over enrollment photos and replaces the
/// identity's gallery rows with the result.
pub struct EnrollmentPipeline<D, E> {
    detector: D,
    embedder: E,
}

impl<D: FaceDetector, E: FaceEmbedder> EnrollmentPipeline<D, E> {
    pub fn new(detector: D, embedder: E) -> Self {
        Self { detector, embedder }
    }

    /// Embed every image, upsert the successful embeddings for `identity`
    /// and persist the gallery.
    ///
    /// Per-image failures are counted, never fatal. With zero successes the
    /// upsert still runs, leaving the identity with no gallery rows.
    pub fn enroll<I>(
        &mut self,
        gallery: &mut Gallery,
        store: &GalleryStore,
        identity: &Identity,
        images: I,
    ) -> Result<EnrollResult, EnrollError>
    where
        I: IntoIterator<Item = GrayImage>,
    {
        self.enroll_loaded(gallery, store, identity, images.into_iter().map(Ok))
    }

    /// Enroll from a `{name}_{id}` dataset folder.
    ///
    /// `identity` overrides the name and id parsed from the folder name.
    /// Images that fail to decode count as failed.
    pub fn enroll_folder(
        &mut self,
        gallery: &mut Gallery,
        store: &GalleryStore,
        folder: &Path,
        identity: Option<Identity>,
    ) -> Result<(Identity, EnrollResult), EnrollError> {
        let identity = match identity {
            Some(identity) => identity,
            None => {
                let folder_name = folder
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                parse_folder_name(folder_name)
                    .ok_or_else(|| EnrollError::InvalidFolder(folder_name.to_string()))?
            }
        };

        let paths = image_files(folder).map_err(|source| EnrollError::Io {
            path: folder.to_path_buf(),
            source,
        })?;
        tracing::info!(
            folder = %folder.display(),
            id = %identity.id,
            images = paths.len(),
            "enrolling from folder"
        );

        let images = paths.into_iter().map(|path| {
            image::open(&path)
                .map(|img| img.to_luma8())
                .map_err(|e| format!("{}: {e}", path.display()))
        });
        let result = self.enroll_loaded(gallery, store, &identity, images)?;
        Ok((identity, result))
    }

    fn enroll_loaded<I>(
        &mut self,
        gallery: &mut Gallery,
        store: &GalleryStore,
        identity: &Identity,
        images: I,
    ) -> Result<EnrollResult, EnrollError>
    where
        I: Iterator<Item = Result<GrayImage, String>>,
    {
        let mut result = EnrollResult::default();
        let mut samples = Vec::new();

        for (index, image) in images.enumerate() {
            let embedded = image.and_then(|img| self.embed_image(&img));
            match embedded {
                Ok(embedding) => {
                    samples.push(embedding);
                    result.processed += 1;
                }
                Err(reason) => {
                    tracing::warn!(id = %identity.id, index, reason = %reason, "enrollment image failed");
                    result.failed += 1;
                }
            }
        }

        gallery.upsert(&identity.id, &identity.name, &samples)?;
        store.save(gallery)?;

        tracing::info!(
            id = %identity.id,
            name = %identity.name,
            processed = result.processed,
            failed = result.failed,
            "enrollment finished"
        );
        Ok(result)
    }

    /// Embed the most confident face, or the whole image when the detector
    /// finds none.
    fn embed_image(&mut self, image: &GrayImage) -> Result<Embedding, String> {
        let faces = self.detector.detect(image).map_err(|e| e.to_string())?;
        let best = faces
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        let crop = match best {
            Some(face) => crop_face(image, face).ok_or("face box outside image")?,
            None => image.clone(),
        };
        self.embedder.embed(&crop).map_err(|e| e.to_string())
    }
}

/// Image files directly inside `folder`, sorted by path.
fn image_files(folder: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(ext)));
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
