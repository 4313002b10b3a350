//! Similarity model seam and the ONNX Runtime siamese implementation.
//!
//! The verification engine only ever sees [`SimilarityModel`]; the
//! siamese network exported from the training notebook is one implementation.

use crate::types::ImageTensor;
use ndarray::Axis;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const SIAMESE_INPUT_COUNT: usize = 2;
const SIAMESE_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scores how alike two preprocessed images are.
///
/// Implementations are called from several worker threads at once when the
/// verifier runs with more than one worker.
pub trait SimilarityModel: Send + Sync {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError>;
}

impl<M: SimilarityModel + ?Sized> SimilarityModel for Box<M> {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError> {
        (**self).score(probe, reference)
    }
}

impl<M: SimilarityModel + ?Sized> SimilarityModel for Arc<M> {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError> {
        (**self).score(probe, reference)
    }
}

/// Two-input siamese network (anchor, validation) with a sigmoid output.
///
/// Both inputs are `1 × H × W × 3` NHWC f32 tensors in [0, 1].
pub struct SiameseModel {
    session: Mutex<Session>,
}

impl SiameseModel {
    /// Load the siamese ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(SIAMESE_INTRA_THREADS)?
            .commit_from_file(model_path)?;

        let num_inputs = session.inputs().len();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded siamese model"
        );

        check_input_count(num_inputs)?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl SimilarityModel for SiameseModel {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError> {
        let anchor = probe.view().insert_axis(Axis(0));
        let validation = reference.view().insert_axis(Axis(0));

        // ort sessions need exclusive access to run.
        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::InferenceFailed("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![
            TensorRef::from_array_view(anchor)?,
            TensorRef::from_array_view(validation)?
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("similarity extraction: {e}")))?;

        single_score(data)
    }
}

fn check_input_count(num_inputs: usize) -> Result<(), ModelError> {
    if num_inputs != SIAMESE_INPUT_COUNT {
        return Err(ModelError::InferenceFailed(format!(
            "siamese model requires {SIAMESE_INPUT_COUNT} inputs (anchor, validation), got {num_inputs}"
        )));
    }
    Ok(())
}

/// The siamese head emits one sigmoid value per pair.
fn single_score(data: &[f32]) -> Result<f32, ModelError> {
    match data {
        [score] => Ok(*score),
        _ => Err(ModelError::InferenceFailed(format!(
            "expected a single similarity value, got {}",
            data.len()
        ))),
    }
}
