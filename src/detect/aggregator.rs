use std::time::Instant;

use anyhow::Result;

use super::backend::{Detector, ModelInput};
use super::labels::DEFAULT_INCLUDE_LABELS;
use super::nms;
use super::result::{BoundingBox, Detection, DetectionSummary};
use crate::frame::Frame;

/// Thresholds and the label allow-list for `DetectionAggregator`.
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    pub confidence_threshold: f32,
    pub overlap_threshold: f32,
    pub include_labels: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            overlap_threshold: 0.3,
            include_labels: DEFAULT_INCLUDE_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

/// Turns one frame into a `DetectionSummary`.
///
/// Frame → model input → detector → best class per candidate → NMS →
/// allow-list → per-label counts.
pub struct DetectionAggregator {
    detector: Box<dyn Detector>,
    config: AggregatorConfig,
}

impl DetectionAggregator {
    pub fn new(detector: Box<dyn Detector>, config: AggregatorConfig) -> Self {
        Self { detector, config }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Analyse one frame. No detections is a normal, empty summary.
    pub fn analyze(&mut self, frame: &Frame) -> Result<DetectionSummary> {
        let (input_w, input_h) = self.detector.input_size();
        let input = ModelInput::from_frame(frame, input_w, input_h)?;

        let started = Instant::now();
        let candidates = self.detector.infer(&input)?;
        log::debug!(
            "DetectionAggregator: {} inference time {:.2}s ({} candidates)",
            self.detector.name(),
            started.elapsed().as_secs_f32(),
            candidates.len()
        );

        let mut boxes = Vec::with_capacity(candidates.len());
        let mut scores = Vec::with_capacity(candidates.len());
        let mut class_ids = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let Some((class_id, score)) = candidate.best_class() else {
                continue;
            };
            boxes.push(BoundingBox::from_normalized(
                candidate,
                frame.width,
                frame.height,
            ));
            scores.push(score);
            class_ids.push(class_id);
        }

        let kept = nms::suppress(
            &boxes,
            &scores,
            self.config.confidence_threshold,
            self.config.overlap_threshold,
        );

        let labels = self.detector.class_labels();
        let mut detections = Vec::with_capacity(kept.len());
        for index in kept {
            let Some(label) = labels.get(class_ids[index]) else {
                log::debug!(
                    "DetectionAggregator: class id {} has no label",
                    class_ids[index]
                );
                continue;
            };
            if !self.config.include_labels.iter().any(|l| l == label) {
                continue;
            }
            detections.push(Detection::new(label.clone(), scores[index], boxes[index]));
        }

        Ok(DetectionSummary::from_detections(detections))
    }
}
