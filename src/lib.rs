//! Waste Classifier Service Library
//!
//! HTTP service that classifies photos of waste into twelve categories with a
//! pre-trained ONNX model and records every prediction in a document store.

pub mod artifact;
pub mod config;
pub mod error;
pub mod gcp;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod server;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use error::ServiceError;
pub use models::inference::InferenceEngine;
pub use preprocess::ImagePreprocessor;
pub use server::AppState;
pub use store::{PredictionRecorder, PredictionStore};
pub use types::{label::WasteClass, prediction::PredictionRecord};
