//! Face embedding boundary, plus an ONNX Runtime embedder for ArcFace-style
//! models (112×112 input, `(p - 127.5) / 127.5` normalization).

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("crop is empty")]
    EmptyCrop,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a face crop to an embedding vector.
pub trait FaceEmbedder {
    fn embed(&mut self, face: &GrayImage) -> Result<Embedding, EmbeddingError>;
}

/// Embedder backed by an ONNX model with a single NCHW float input.
pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, EmbeddingError> {
        if !model_path.exists() {
            return Err(EmbeddingError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    /// Resize a grayscale crop to the model input and replicate it into three
    /// identical channels.
    fn preprocess(face: &GrayImage) -> Array4<f32> {
        let resized = imageops::resize(face, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let size = INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let normalized = (pixel[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] = normalized;
            }
        }

        tensor
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, face: &GrayImage) -> Result<Embedding, EmbeddingError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbeddingError::EmptyCrop);
        }

        let input = Self::preprocess(face);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(EmbeddingError::InferenceFailed("model produced an empty output".into()));
        }

        Ok(l2_normalize(raw.to_vec()))
    }
}

/// Scale to unit length; zero vectors are returned unchanged.
pub fn l2_normalize(mut values: Vec<f32>) -> Embedding {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }
    Embedding::new(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_preprocess_output_shape() {
        let face = GrayImage::from_pixel(40, 60, Luma([128]));
        let tensor = OnnxEmbedder::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let face = GrayImage::from_pixel(112, 112, Luma([255]));
        let tensor = OnnxEmbedder::preprocess(&face);
        let expected = (255.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 0, 5, 5]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let face = GrayImage::from_fn(112, 112, |x, y| Luma([((x + y) % 256) as u8]));
        let tensor = OnnxEmbedder::preprocess(&face);
        for y in 0..112 {
            for x in 0..112 {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_l2_normalize() {
        let e = l2_normalize(vec![3.0, 4.0]);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
        let norm: f32 = e.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]).values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmbedder::load(Path::new("/nonexistent/arcface.onnx")).err().unwrap();
        assert!(matches!(err, EmbeddingError::ModelNotFound(_)));
    }
}
