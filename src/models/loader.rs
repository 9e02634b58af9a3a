//! ONNX model loader

use crate::error::ServiceError;
use crate::models::inference::Classifier;
use crate::preprocess::ImageTensor;
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Loaded ONNX model with metadata
pub struct LoadedModel {
    /// Model name
    pub name: String,
    /// ONNX Runtime session, locked for the duration of a run
    session: Mutex<Session>,
    /// Input name for the model
    pub input_name: String,
    /// Output name for class scores
    pub output_name: String,
    /// Class count declared by the output shape, when static
    pub output_width: Option<usize>,
}

impl LoadedModel {
    /// Run the model and copy out the score tensor
    fn run(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let input_tensor = Tensor::from_array((input.dims(), input.data().to_vec()))
            .context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;

        let output = outputs
            .get(self.output_name.as_str())
            .with_context(|| format!("Model produced no output named {}", self.output_name))?;
        let (shape, data) = output.try_extract_tensor::<f32>()?;

        debug!(model = %self.name, shape = ?shape, "Extracted score tensor");

        Ok(data.to_vec())
    }
}

impl Classifier for LoadedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_width(&self) -> Option<usize> {
        self.output_width
    }

    fn scores(&self, input: &ImageTensor) -> Result<Vec<f32>, ServiceError> {
        self.run(input)
            .map_err(|e| ServiceError::Inference(format!("{:#}", e)))
    }
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        // Initialize ONNX Runtime
        ort::init().commit()?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load the classifier from an ONNX file
    pub fn load_model<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<LoadedModel> {
        let path = path.as_ref();

        info!(
            model = %name,
            path = %path.display(),
            threads = self.onnx_threads,
            "Loading ONNX model"
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("Model declares no inputs")?;

        // The classification head is the first output
        let output = session.outputs.first().context("Model declares no outputs")?;
        let output_name = output.name.clone();
        let output_width = output
            .output_type
            .tensor_shape()
            .and_then(|shape| shape.last().copied())
            .filter(|&dim| dim > 0)
            .map(|dim| dim as usize);

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            output_width = ?output_width,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            output_width,
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self { onnx_threads: 1 }
    }
}
