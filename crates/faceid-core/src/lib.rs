//! faceid-core — Siamese face verification decisions.
//!
//! Normalizes probe and reference images into the model's fixed input
//! tensor, scores every (probe, reference) pair with a similarity model,
//! and reduces the scores to a verified/unverified decision using a
//! per-pair detection threshold and an aggregate verification threshold.

pub mod engine;
pub mod gallery;
pub mod model;
pub mod preprocess;
pub mod progress;
pub mod types;

pub use engine::{decide, ImageRole, Verifier, VerifyError};
pub use gallery::{Gallery, GalleryError};
pub use model::{ModelError, SiameseModel, SimilarityModel};
pub use preprocess::{CropRegion, PreprocessError, Preprocessor};
pub use progress::{DecileProgress, NoProgress, ProgressObserver};
pub use types::{Decision, ImageTensor, RawImage, Thresholds};
