#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, ModelInput, RawCandidate, DEFAULT_INPUT_SIZE};

/// YOLO detector running an ONNX export on `tract`.
///
/// The model takes a `[1, 3, H, W]` f32 tensor and produces rows of
/// `[cx, cy, w, h, objectness, class scores...]` with coordinates relative to
/// the input. Outputs from several detection heads are concatenated.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    width: u32,
    height: u32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, labels: Vec<String>) -> Result<Self> {
        Self::with_input_size(model_path, labels, DEFAULT_INPUT_SIZE)
    }

    pub fn with_input_size<P: AsRef<Path>>(
        model_path: P,
        labels: Vec<String>,
        (width, height): (u32, u32),
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("detector needs at least one class label"));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractDetector: loaded {} ({} classes, {}x{} input)",
            model_path.display(),
            labels.len(),
            width,
            height
        );
        Ok(Self {
            model,
            labels,
            width,
            height,
        })
    }

    fn build_input(&self, input: &ModelInput) -> Result<Tensor> {
        if input.width != self.width || input.height != self.height {
            return Err(anyhow!(
                "model input {}x{} does not match model size {}x{}",
                input.width,
                input.height,
                self.width,
                self.height
            ));
        }
        let array = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.height as usize, self.width as usize),
            input.data().to_vec(),
        )
        .context("reshape model input")?;
        Ok(array.into_tensor())
    }

    fn decode_outputs(&self, outputs: TVec<TValue>) -> Result<Vec<RawCandidate>> {
        let row_len = 5 + self.labels.len();
        let mut candidates = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let values: Vec<f32> = view.iter().copied().collect();
            if values.len() % row_len != 0 {
                return Err(anyhow!(
                    "model output of {} values is not a multiple of {} (5 + {} classes)",
                    values.len(),
                    row_len,
                    self.labels.len()
                ));
            }
            for row in values.chunks_exact(row_len) {
                let objectness = row[4];
                candidates.push(RawCandidate {
                    center_x: row[0],
                    center_y: row[1],
                    width: row[2],
                    height: row[3],
                    class_scores: row[5..].iter().map(|s| s * objectness).collect(),
                });
            }
        }
        Ok(candidates)
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_labels(&self) -> &[String] {
        &self.labels
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn infer(&mut self, input: &ModelInput) -> Result<Vec<RawCandidate>> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        self.decode_outputs(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Tensor::zero::<f32>(&[1, 3, self.height as usize, self.width as usize])?;
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up failed")?;
        Ok(())
    }
}
