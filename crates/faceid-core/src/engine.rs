//! Verification engine: pairs a probe with every gallery image, scores each
//! pair and reduces the scores to a single decision.

use crate::model::{ModelError, SimilarityModel};
use crate::preprocess::{PreprocessError, Preprocessor};
use crate::progress::{NoProgress, ProgressObserver};
use crate::types::{Decision, ImageTensor, RawImage, Thresholds};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Which input image a preprocessing failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Probe,
    /// Position in the gallery.
    Reference(usize),
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => f.write_str("probe image"),
            Self::Reference(index) => write!(f, "gallery image {index}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("gallery is empty")]
    EmptyGallery,
    #[error("invalid {image}: {source}")]
    InvalidImage {
        image: ImageRole,
        #[source]
        source: PreprocessError,
    },
    #[error("similarity model failed on gallery image {index}: {source}")]
    ModelInference {
        index: usize,
        #[source]
        source: ModelError,
    },
}

/// Reduce per-pair scores to a decision.
///
/// A pair is a detection when its score is strictly above
/// `thresholds.detection`; the probe is verified when the fraction of
/// detections is strictly above `thresholds.verification`.
pub fn decide(scores: Vec<f32>, thresholds: Thresholds) -> Result<Decision, VerifyError> {
    if scores.is_empty() {
        return Err(VerifyError::EmptyGallery);
    }

    let detections = scores.iter().filter(|&&s| s > thresholds.detection).count();
    let ratio = detections as f32 / scores.len() as f32;
    let verified = ratio > thresholds.verification;

    Ok(Decision {
        scores,
        detections,
        ratio,
        verified,
    })
}

/// Verifies probe images against a gallery with an injected similarity model.
pub struct Verifier<M> {
    model: M,
    preprocessor: Preprocessor,
    /// Present only when more than one worker was requested.
    pool: Option<ThreadPool>,
}

impl<M: SimilarityModel> Verifier<M> {
    /// Sequential verifier using the default 100×100 preprocessor.
    pub fn new(model: M) -> Self {
        Self {
            model,
            preprocessor: Preprocessor::default(),
            pool: None,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Score gallery images on a pool of `workers` threads. Zero or one keeps
    /// scoring sequential on the calling thread.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool = None;
        if workers > 1 {
            match ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("faceid-score-{i}"))
                .build()
            {
                Ok(pool) => self.pool = Some(pool),
                Err(e) => tracing::warn!(
                    workers,
                    error = %e,
                    "failed to build scoring pool; scoring sequentially"
                ),
            }
        }
        self
    }

    /// Threads used to score gallery pairs.
    pub fn workers(&self) -> usize {
        self.pool.as_ref().map_or(1, ThreadPool::current_num_threads)
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Verify `probe` against `gallery`.
    ///
    /// `gallery` order is preserved in the returned scores. Any failure aborts
    /// the whole call; no partial decision is produced.
    pub fn verify(
        &self,
        probe: &RawImage,
        gallery: &[RawImage],
        thresholds: Thresholds,
    ) -> Result<Decision, VerifyError> {
        self.verify_with_progress(probe, gallery, thresholds, &NoProgress)
    }

    /// Like [`verify`](Self::verify), notifying `observer` after each comparison.
    pub fn verify_with_progress(
        &self,
        probe: &RawImage,
        gallery: &[RawImage],
        thresholds: Thresholds,
        observer: &dyn ProgressObserver,
    ) -> Result<Decision, VerifyError> {
        if gallery.is_empty() {
            return Err(VerifyError::EmptyGallery);
        }

        let probe = self
            .preprocessor
            .preprocess(probe)
            .map_err(|source| VerifyError::InvalidImage {
                image: ImageRole::Probe,
                source,
            })?;

        let scores = match &self.pool {
            Some(pool) if gallery.len() > 1 => {
                self.score_parallel(pool, &probe, gallery, observer)?
            }
            _ => self.score_sequential(&probe, gallery, observer)?,
        };

        let decision = decide(scores, thresholds)?;
        tracing::info!(
            gallery = gallery.len(),
            detections = decision.detections,
            ratio = decision.ratio,
            verified = decision.verified,
            detection_threshold = thresholds.detection,
            verification_threshold = thresholds.verification,
            "verification complete"
        );
        Ok(decision)
    }

    /// Score a single (probe, reference) pair, both given as raw images.
    pub fn score_pair(&self, probe: &RawImage, reference: &RawImage) -> Result<f32, VerifyError> {
        let probe = self
            .preprocessor
            .preprocess(probe)
            .map_err(|source| VerifyError::InvalidImage {
                image: ImageRole::Probe,
                source,
            })?;
        self.score_reference(&probe, 0, reference)
    }

    fn score_reference(
        &self,
        probe: &ImageTensor,
        index: usize,
        reference: &RawImage,
    ) -> Result<f32, VerifyError> {
        let reference = self
            .preprocessor
            .preprocess(reference)
            .map_err(|source| VerifyError::InvalidImage {
                image: ImageRole::Reference(index),
                source,
            })?;

        let score = self
            .model
            .score(probe, &reference)
            .map_err(|source| VerifyError::ModelInference { index, source })?;

        tracing::debug!(index, score, "scored pair");
        Ok(score)
    }

    fn score_sequential(
        &self,
        probe: &ImageTensor,
        gallery: &[RawImage],
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<f32>, VerifyError> {
        let total = gallery.len();
        let mut scores = Vec::with_capacity(total);
        for (index, reference) in gallery.iter().enumerate() {
            scores.push(self.score_reference(probe, index, reference)?);
            observer.on_progress(index + 1, total);
        }
        Ok(scores)
    }

    /// Indexed collect keeps gallery order regardless of completion order;
    /// collecting into a `Result` stops handing out pairs after a failure.
    fn score_parallel(
        &self,
        pool: &ThreadPool,
        probe: &ImageTensor,
        gallery: &[RawImage],
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<f32>, VerifyError> {
        let total = gallery.len();
        let completed = AtomicUsize::new(0);

        tracing::debug!(
            workers = pool.current_num_threads(),
            total,
            "scoring gallery in parallel"
        );

        pool.install(|| {
            gallery
                .par_iter()
                .enumerate()
                .map(|(index, reference)| -> Result<f32, VerifyError> {
                    let score = self.score_reference(probe, index, reference)?;
                    let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
                    observer.on_progress(done, total);
                    Ok(score)
                })
                .collect()
        })
    }
}
