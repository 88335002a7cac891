use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};

use crate::frame::Frame;

/// Model input resolution used by the bundled YOLO models.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (416, 416);

/// Planar (NCHW, batch of one) RGB tensor, scaled to `[0, 1]` with zero mean.
#[derive(Clone, Debug)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
    data: Vec<f32>,
}

impl ModelInput {
    /// Resize `frame` to `width`x`height` and normalise it (1/255, RGB order).
    pub fn from_frame(frame: &Frame, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        let image = frame.to_rgb_image().context("prepare model input")?;
        let resized = if image.dimensions() == (width, height) {
            image
        } else {
            imageops::resize(&image, width, height, FilterType::Triangle)
        };

        let plane = (width as usize) * (height as usize);
        let mut data = vec![0f32; plane * 3];
        for (i, pixel) in resized.pixels().enumerate() {
            for channel in 0..3 {
                data[channel * plane + i] = pixel.0[channel] as f32 / 255.0;
            }
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Tensor values in `[1, 3, height, width]` order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.height as usize, self.width as usize]
    }
}

/// One raw detector candidate: a normalised box and a score per class.
#[derive(Clone, Debug, PartialEq)]
pub struct RawCandidate {
    /// Box center and size, relative to the frame (0..1).
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    /// Index `i` is the score for class label `i`.
    pub class_scores: Vec<f32>,
}

impl RawCandidate {
    /// Highest-scoring class and its score.
    pub fn best_class(&self) -> Option<(usize, f32)> {
        self.class_scores
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (idx, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((idx, score)),
            })
    }
}

/// Object detector.
///
/// Implementations own the model and its class list. They must not keep the
/// input beyond the `infer` call.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class labels, indexed like `RawCandidate::class_scores`.
    fn class_labels(&self) -> &[String];

    /// Expected model input size.
    fn input_size(&self) -> (u32, u32) {
        DEFAULT_INPUT_SIZE
    }

    /// Run the forward pass.
    fn infer(&mut self, input: &ModelInput) -> Result<Vec<RawCandidate>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
