use super::backend::RawCandidate;

/// Axis-aligned box in frame pixels. `x`/`y` is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert a normalised center/size box to frame pixels (darknet decoding).
    pub fn from_normalized(candidate: &RawCandidate, frame_w: u32, frame_h: u32) -> Self {
        let center_x = (candidate.center_x * frame_w as f32) as i32;
        let center_y = (candidate.center_y * frame_h as f32) as i32;
        let width = (candidate.width * frame_w as f32) as i32;
        let height = (candidate.height * frame_h as f32) as i32;
        Self {
            x: center_x - width / 2,
            y: center_y - height / 2,
            width,
            height,
        }
    }

    pub fn centroid(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    pub fn area(&self) -> f32 {
        (self.width.max(0) as f32) * (self.height.max(0) as f32)
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let right = (self.x + self.width).min(other.x + other.width);
        let top = self.y.max(other.y);
        let bottom = (self.y + self.height).min(other.y + other.height);
        let intersection = ((right - left).max(0) as f32) * ((bottom - top).max(0) as f32);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One kept, allow-listed detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub centroid: (f32, f32),
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            centroid: bbox.centroid(),
            bbox,
        }
    }
}

/// Per-label aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryItem {
    pub label: String,
    pub count: usize,
    /// Centroid of the first detection seen with this label.
    pub representative_centroid: (f32, f32),
}

/// What one frame contained.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSummary {
    pub has_object: bool,
    /// Labels in first-encountered order.
    pub items: Vec<SummaryItem>,
    /// The detections behind `items`, used to annotate snapshots.
    pub detections: Vec<Detection>,
}

impl DetectionSummary {
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        let mut items: Vec<SummaryItem> = Vec::new();
        for detection in &detections {
            match items.iter_mut().find(|item| item.label == detection.label) {
                Some(item) => item.count += 1,
                None => items.push(SummaryItem {
                    label: detection.label.clone(),
                    count: 1,
                    representative_centroid: detection.centroid,
                }),
            }
        }
        Self {
            has_object: !items.is_empty(),
            items,
            detections,
        }
    }

    /// `"2 person, 1 knife,"` style listing used in alert captions.
    pub fn describe(&self) -> String {
        self.items
            .iter()
            .map(|item| format!("{} {},", item.count, item.label))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
