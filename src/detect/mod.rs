mod aggregator;
mod backend;
mod backends;
mod labels;
pub mod nms;
mod result;

pub use aggregator::{AggregatorConfig, DetectionAggregator};
pub use backend::{Detector, ModelInput, RawCandidate, DEFAULT_INPUT_SIZE};
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use labels::{coco_labels, load_labels, COCO_LABELS, DEFAULT_INCLUDE_LABELS};
pub use result::{BoundingBox, Detection, DetectionSummary, SummaryItem};
