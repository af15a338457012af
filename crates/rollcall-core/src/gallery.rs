//! Gallery store: known identities and their embedding samples.
//!
//! The gallery is held in memory as an `N × D` matrix plus parallel `names`
//! and `ids` vectors, so matching is a single matrix-vector product. On disk
//! it is a JSON document; two historical layouts are accepted on load.

use crate::persist::write_atomic;
use crate::types::{Embedding, StudentId};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Schema version written by [`GalleryStore::save`].
pub const GALLERY_SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt gallery: {0}")]
    Corrupt(String),
    #[error("embedding dimension mismatch: gallery has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("serialize gallery: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("gallery shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Per-identity view of the gallery, in order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySummary {
    pub id: StudentId,
    pub name: String,
    pub samples: usize,
}

/// In-memory gallery. Invariant: `names.len() == ids.len() == embeddings.nrows()`.
#[derive(Debug, Clone)]
pub struct Gallery {
    embeddings: Array2<f32>,
    names: Vec<String>,
    ids: Vec<StudentId>,
}

impl Default for Gallery {
    fn default() -> Self {
        Self::empty()
    }
}

impl Gallery {
    pub fn empty() -> Self {
        Self {
            embeddings: Array2::zeros((0, 0)),
            names: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// Build a gallery from parallel columns, validating lengths and dimensions.
    pub fn from_parts(
        embeddings: Vec<Vec<f32>>,
        names: Vec<String>,
        ids: Vec<StudentId>,
    ) -> Result<Self, GalleryError> {
        if embeddings.len() != names.len() || names.len() != ids.len() {
            return Err(GalleryError::Corrupt(format!(
                "column lengths differ: {} embeddings, {} names, {} ids",
                embeddings.len(),
                names.len(),
                ids.len()
            )));
        }

        let dim = embeddings.first().map_or(0, Vec::len);
        if !embeddings.is_empty() && dim == 0 {
            return Err(GalleryError::Corrupt("embedding rows are empty".into()));
        }
        if let Some((row, bad)) = embeddings.iter().enumerate().find(|(_, e)| e.len() != dim) {
            return Err(GalleryError::Corrupt(format!(
                "row {row} has {} values, expected {dim}",
                bad.len()
            )));
        }

        let rows = embeddings.len();
        let flat: Vec<f32> = embeddings.into_iter().flatten().collect();
        let embeddings = Array2::from_shape_vec((rows, dim), flat)?;

        Ok(Self {
            embeddings,
            names,
            ids,
        })
    }

    /// Number of embedding rows (not distinct identities).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Embedding dimension `D`; 0 for a gallery that never held a row.
    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn embeddings(&self) -> &Array2<f32> {
        &self.embeddings
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ids(&self) -> &[StudentId] {
        &self.ids
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.embeddings.row(index)
    }

    /// Number of rows stored for `id`.
    pub fn samples_for(&self, id: &StudentId) -> usize {
        self.ids.iter().filter(|i| *i == id).count()
    }

    pub fn identities(&self) -> Vec<IdentitySummary> {
        let mut out: Vec<IdentitySummary> = Vec::new();
        for (id, name) in self.ids.iter().zip(&self.names) {
            match out.iter_mut().find(|s| &s.id == id) {
                Some(summary) => summary.samples += 1,
                None => out.push(IdentitySummary {
                    id: id.clone(),
                    name: name.clone(),
                    samples: 1,
                }),
            }
        }
        out
    }

    /// Replace every row for `id` with one row per element of `samples`.
    ///
    /// Old rows for `id` are dropped, never merged. An empty `samples` leaves
    /// the id with no rows at all. On error the gallery is left untouched.
    pub fn upsert(
        &mut self,
        id: &StudentId,
        name: &str,
        samples: &[Embedding],
    ) -> Result<(), GalleryError> {
        let kept: Vec<usize> = (0..self.len()).filter(|&i| &self.ids[i] != id).collect();

        let dim = if kept.is_empty() {
            samples.first().map_or(self.dim(), Embedding::dim)
        } else {
            self.dim()
        };
        if let Some(bad) = samples.iter().find(|e| e.dim() != dim) {
            return Err(GalleryError::DimensionMismatch {
                expected: dim,
                actual: bad.dim(),
            });
        }

        let rows = kept.len() + samples.len();
        let mut flat = Vec::with_capacity(rows * dim);
        let mut names = Vec::with_capacity(rows);
        let mut ids = Vec::with_capacity(rows);

        for &i in &kept {
            flat.extend(self.embeddings.row(i).iter().copied());
            names.push(self.names[i].clone());
            ids.push(self.ids[i].clone());
        }
        for sample in samples {
            flat.extend_from_slice(&sample.values);
            names.push(name.to_string());
            ids.push(id.clone());
        }

        let replaced = self.len() - kept.len();
        self.embeddings = Array2::from_shape_vec((rows, dim), flat)?;
        self.names = names;
        self.ids = ids;

        tracing::debug!(
            id = %id,
            replaced,
            added = samples.len(),
            total = self.len(),
            "gallery upsert"
        );
        Ok(())
    }

    /// Drop every row for `id`. Returns how many rows were removed.
    pub fn remove(&mut self, id: &StudentId) -> Result<usize, GalleryError> {
        let before = self.samples_for(id);
        self.upsert(id, "", &[])?;
        Ok(before)
    }
}

/// Raw id as found on disk: older files stored plain integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

/// On-disk layout, permissive enough to cover every known schema.
#[derive(Deserialize)]
struct GalleryFile {
    version: Option<u32>,
    embeddings: Option<Vec<Vec<f32>>>,
    encodings: Option<Vec<Vec<f32>>>,
    names: Option<Vec<String>>,
    ids: Option<Vec<RawId>>,
}

#[derive(Serialize)]
struct GalleryFileOut<'a> {
    version: u32,
    embeddings: Vec<Vec<f32>>,
    names: &'a [String],
    ids: &'a [StudentId],
}

impl GalleryFile {
    /// Normalize any accepted schema into a [`Gallery`].
    ///
    /// - no `version`: legacy layout, embeddings under `embeddings` or `encodings`
    /// - `version: 1`: embeddings under `embeddings` only
    fn into_gallery(self) -> Result<Gallery, GalleryError> {
        let embeddings = match self.version {
            None => self.embeddings.or(self.encodings),
            Some(GALLERY_SCHEMA_VERSION) => self.embeddings,
            Some(other) => {
                return Err(GalleryError::Corrupt(format!(
                    "unsupported schema version {other}"
                )))
            }
        }
        .ok_or_else(|| GalleryError::Corrupt("missing field `embeddings`".into()))?;

        let names = self
            .names
            .ok_or_else(|| GalleryError::Corrupt("missing field `names`".into()))?;
        let raw_ids = self
            .ids
            .ok_or_else(|| GalleryError::Corrupt("missing field `ids`".into()))?;

        let ids = raw_ids
            .into_iter()
            .map(|raw| match raw {
                RawId::Number(n) => StudentId::parse(&n.to_string()),
                RawId::Text(s) => StudentId::parse(&s),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GalleryError::Corrupt(e.to_string()))?;

        Gallery::from_parts(embeddings, names, ids)
    }
}

/// File-backed gallery persistence.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the gallery. A missing file is an empty gallery; a malformed one
    /// is [`GalleryError::Corrupt`] and is never repaired automatically.
    pub fn load(&self) -> Result<Gallery, GalleryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no gallery file yet; starting empty");
                return Ok(Gallery::empty());
            }
            Err(source) => {
                return Err(GalleryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: GalleryFile = serde_json::from_str(&content)
            .map_err(|e| GalleryError::Corrupt(format!("{}: {e}", self.path.display())))?;
        let gallery = file.into_gallery()?;

        tracing::info!(
            path = %self.path.display(),
            rows = gallery.len(),
            dim = gallery.dim(),
            identities = gallery.identities().len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Persist the gallery in the current schema, replacing the file atomically.
    pub fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        let out = GalleryFileOut {
            version: GALLERY_SCHEMA_VERSION,
            embeddings: gallery.embeddings.rows().into_iter().map(|r| r.to_vec()).collect(),
            names: &gallery.names,
            ids: &gallery.ids,
        };
        let json = serde_json::to_vec(&out)?;

        write_atomic(&self.path, &json).map_err(|source| GalleryError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(path = %self.path.display(), rows = gallery.len(), "gallery saved");
        Ok(())
    }
}
