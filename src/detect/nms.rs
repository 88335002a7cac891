//! Greedy non-maximum suppression.

use super::result::BoundingBox;

/// Reduce overlapping boxes to a kept subset.
///
/// Boxes scoring below `confidence_threshold` are discarded. The rest are
/// visited from highest to lowest score; a box is kept unless its IoU with an
/// already kept box exceeds `overlap_threshold`. Suppression is class-agnostic.
///
/// Returns indices into `boxes`, highest score first.
pub fn suppress(
    boxes: &[BoundingBox],
    scores: &[f32],
    confidence_threshold: f32,
    overlap_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len()))
        .filter(|&i| scores[i] >= confidence_threshold)
        .collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut kept: Vec<usize> = Vec::with_capacity(order.len());
    for index in order {
        let overlaps = kept
            .iter()
            .any(|&k| boxes[k].iou(&boxes[index]) > overlap_threshold);
        if !overlaps {
            kept.push(index);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_boxes_collapse_to_the_best() {
        let boxes = [
            BoundingBox::new(100, 100, 50, 100),
            BoundingBox::new(102, 101, 50, 100),
            BoundingBox::new(300, 300, 40, 40),
        ];
        let scores = [0.8, 0.9, 0.6];

        assert_eq!(suppress(&boxes, &scores, 0.4, 0.3), vec![1, 2]);
    }

    #[test]
    fn low_confidence_boxes_are_dropped() {
        let boxes = [BoundingBox::new(0, 0, 10, 10), BoundingBox::new(50, 50, 10, 10)];
        let scores = [0.39, 0.4];

        assert_eq!(suppress(&boxes, &scores, 0.4, 0.3), vec![1]);
    }

    #[test]
    fn overlap_at_threshold_is_kept() {
        // IoU of exactly 1/3.
        let boxes = [BoundingBox::new(0, 0, 10, 10), BoundingBox::new(5, 0, 10, 10)];
        let scores = [0.9, 0.8];

        assert_eq!(suppress(&boxes, &scores, 0.4, 0.34), vec![0, 1]);
        assert_eq!(suppress(&boxes, &scores, 0.4, 0.3), vec![0]);
    }

    #[test]
    fn empty_input_keeps_nothing() {
        assert!(suppress(&[], &[], 0.4, 0.3).is_empty());
    }
}
