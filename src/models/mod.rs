//! ML model inference components

pub mod inference;
pub mod loader;

pub use inference::{argmax, Classifier, InferenceEngine, PredictionResult};
pub use loader::{LoadedModel, ModelLoader};
