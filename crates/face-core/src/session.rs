//! One inference context: an ONNX session plus its pre-allocated tensors.
//!
//! Sessions are built once at pool construction and reused for every request
//! they serve, so the hot path performs no tensor allocation: preprocessing
//! writes into the owned input array, `run` borrows it for the engine call and
//! copies the engine output into the owned output buffer.

use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session as OrtSession};
use ort::value::TensorRef;

use crate::profile::{INPUT_HEIGHT, INPUT_WIDTH};

pub struct Session {
    session: OrtSession,
    input: Array4<f32>,
    output: Vec<f32>,
}

impl Session {
    /// Load the model and allocate the fixed input/output storage.
    ///
    /// `output_len` is the expected `C x G` float count of the output head;
    /// the buffer is sized for it up front but tolerates a differently shaped
    /// model, which postprocessing then rejects.
    pub fn load(model_path: &Path, output_len: usize) -> Result<Self> {
        let session = OrtSession::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_cpus::get())?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model {}", model_path.display()))?;

        Ok(Self {
            session,
            input: Array4::zeros((1, 3, INPUT_HEIGHT, INPUT_WIDTH)),
            output: Vec::with_capacity(output_len),
        })
    }

    /// Flat view of the planar input tensor for the preprocessor to fill.
    pub fn input_mut(&mut self) -> &mut [f32] {
        self.input
            .as_slice_mut()
            .expect("planar input tensor is contiguous")
    }

    /// Run the engine over the current input tensor.
    ///
    /// The returned slice is the flat output buffer, valid until the next
    /// call. Its length is whatever the model produced; shape validation
    /// happens in postprocessing.
    pub fn run(&mut self) -> Result<&[f32]> {
        let input = TensorRef::from_array_view(&self.input)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("model inference")?;
        let data = outputs[0]
            .try_extract_array::<f32>()
            .context("model output is not a float tensor")?;

        self.output.clear();
        match data.as_slice() {
            Some(flat) => self.output.extend_from_slice(flat),
            None => self.output.extend(data.iter().copied()),
        }
        Ok(&self.output)
    }
}
