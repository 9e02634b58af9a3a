//! Inference engine for waste classification

use crate::error::ServiceError;
use crate::preprocess::ImageTensor;
use crate::types::label::WasteClass;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// A model that maps an image tensor to one score per class.
///
/// Implementations must be callable from several threads at once.
pub trait Classifier: Send + Sync {
    /// Name used in logs and the health endpoint
    fn name(&self) -> &str;

    /// Number of classes declared by the model, when known before running it
    fn output_width(&self) -> Option<usize> {
        None
    }

    /// Run the forward pass and return the raw class scores
    fn scores(&self, input: &ImageTensor) -> Result<Vec<f32>, ServiceError>;
}

/// Result of model inference
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// Predicted class
    pub label: WasteClass,
    /// Score of the predicted class
    pub score: f32,
    /// Raw scores in label order
    pub scores: Vec<f32>,
}

/// Index of the largest score. Ties go to the lowest index and NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Runs the hosted classifier and reduces its output to a label.
#[derive(Clone)]
pub struct InferenceEngine {
    model: Arc<dyn Classifier>,
}

impl InferenceEngine {
    /// Wrap a loaded model, failing if its declared width does not match the labels
    pub fn new(model: Arc<dyn Classifier>) -> Result<Self> {
        if let Some(width) = model.output_width() {
            if width != WasteClass::COUNT {
                anyhow::bail!(
                    "Model {} emits {} classes but {} labels are defined",
                    model.name(),
                    width,
                    WasteClass::COUNT
                );
            }
        }

        info!(
            model = %model.name(),
            classes = WasteClass::COUNT,
            "Inference engine initialized"
        );

        Ok(Self { model })
    }

    /// Name of the hosted model
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Classify a preprocessed image
    pub fn predict(&self, input: &ImageTensor) -> Result<PredictionResult, ServiceError> {
        let scores = self.model.scores(input)?;

        if scores.len() != WasteClass::COUNT {
            return Err(ServiceError::Inference(format!(
                "Model returned {} scores, expected {}",
                scores.len(),
                WasteClass::COUNT
            )));
        }

        let index = argmax(&scores).ok_or_else(|| {
            ServiceError::Inference("Model returned no comparable scores".to_string())
        })?;
        let label = WasteClass::from_index(index).ok_or_else(|| {
            ServiceError::Inference(format!("No label for output index {}", index))
        })?;

        debug!(
            model = %self.model.name(),
            label = %label,
            score = scores[index],
            "Inference complete"
        );

        Ok(PredictionResult {
            label,
            score: scores[index],
            scores,
        })
    }
}
