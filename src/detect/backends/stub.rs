use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::{Detector, ModelInput, RawCandidate};
use crate::detect::labels::coco_labels;

/// Scripted detector for tests and `stub://` demos.
///
/// Each `infer` call returns the next queued output (or failure). Once the
/// script runs out it returns no candidates.
pub struct StubDetector {
    labels: Vec<String>,
    script: VecDeque<Result<Vec<RawCandidate>, String>>,
    calls: u64,
}

impl StubDetector {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            script: VecDeque::new(),
            calls: 0,
        }
    }

    /// Queue the candidates returned by the next unscripted call.
    pub fn push_output(&mut self, candidates: Vec<RawCandidate>) {
        self.script.push_back(Ok(candidates));
    }

    /// Queue an inference failure.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.script.push_back(Err(message.into()));
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new(coco_labels())
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(&mut self, _input: &ModelInput) -> Result<Vec<RawCandidate>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(candidates)) => Ok(candidates),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn stub_detector_replays_its_script() -> Result<()> {
        let frame = Frame::from_rgb8(vec![0; 12], 2, 2)?;
        let input = ModelInput::from_frame(&frame, 2, 2)?;
        let mut detector = StubDetector::default();
        detector.push_output(vec![RawCandidate {
            center_x: 0.5,
            center_y: 0.5,
            width: 0.5,
            height: 0.5,
            class_scores: vec![0.9],
        }]);
        detector.push_failure("boom");

        assert_eq!(detector.infer(&input)?.len(), 1);
        assert!(detector.infer(&input).is_err());
        assert!(detector.infer(&input)?.is_empty());
        assert_eq!(detector.calls(), 3);
        assert_eq!(detector.class_labels()[0], "person");
        Ok(())
    }
}
