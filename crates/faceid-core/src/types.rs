use image::DynamicImage;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default per-pair cutoff used by the original application.
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.99;
/// Default fraction of matching pairs required for a positive decision.
pub const DEFAULT_VERIFICATION_THRESHOLD: f32 = 0.7;

/// An image as handed over by an image source, before preprocessing.
#[derive(Debug, Clone)]
pub enum RawImage {
    /// Encoded file bytes (JPEG, PNG, ...), decoded during preprocessing.
    Encoded(Vec<u8>),
    /// Already-decoded pixels, e.g. a camera frame.
    Decoded(DynamicImage),
}

impl RawImage {
    /// Read an encoded image from disk. Decoding is deferred to the preprocessor.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::Encoded(std::fs::read(path)?))
    }
}

impl From<DynamicImage> for RawImage {
    fn from(image: DynamicImage) -> Self {
        Self::Decoded(image)
    }
}

impl From<Vec<u8>> for RawImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Encoded(bytes)
    }
}

/// Preprocessed model input: height × width × RGB, every element in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(Array3<f32>);

impl ImageTensor {
    pub(crate) fn new(data: Array3<f32>) -> Self {
        Self(data)
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    /// `[height, width, channels]`.
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.0
    }
}

/// The two independent cutoffs applied by [`decide`](crate::engine::decide).
///
/// Neither value is range-checked; values outside [0, 1] simply produce
/// all-or-nothing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// A pair counts as a detection when its score is strictly above this.
    pub detection: f32,
    /// The probe is verified when the detection ratio is strictly above this.
    pub verification: f32,
}

impl Thresholds {
    pub const fn new(detection: f32, verification: f32) -> Self {
        Self {
            detection,
            verification,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTION_THRESHOLD, DEFAULT_VERIFICATION_THRESHOLD)
    }
}

/// Outcome of one verification call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// One score per gallery image, in gallery order.
    pub scores: Vec<f32>,
    /// Number of scores strictly above the detection threshold.
    pub detections: usize,
    /// `detections / scores.len()`.
    pub ratio: f32,
    pub verified: bool,
}
