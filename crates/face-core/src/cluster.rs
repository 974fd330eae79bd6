//! Collapsing near-duplicate detections into one box per face.
//!
//! The detector emits many overlapping proposals per real face. Plain NMS can
//! split a single face into two boxes when proposals are wide but mutually
//! overlapping, so duplicates are instead grouped by DBSCAN over the 4-D
//! corner coordinates, stray noise boxes are absorbed by IoU against already
//! grouped boxes, and each cluster is merged into its axis-aligned union.

use crate::geometry::{corner_distance, iou, median, union_box};
use crate::postprocess::Detection;
use crate::profile::{DEFAULT_CLUSTER_SIZE, IOU_THRESHOLD};

const NOISE: i32 = -1;

/// Merge overlapping detections into final face boxes.
///
/// The clustering radius adapts to the typical face size in the image: half
/// the median box side, floored at half of [`DEFAULT_CLUSTER_SIZE`].
pub fn cluster_boxes(detections: &[Detection]) -> Vec<[i32; 4]> {
    if detections.is_empty() {
        return Vec::new();
    }

    let eps = median_box_size(detections).max(DEFAULT_CLUSTER_SIZE) * 0.5;
    let min_points = if detections.len() > 3 { 2 } else { 1 };

    let points: Vec<[f64; 4]> = detections
        .iter()
        .map(|det| {
            [
                det.bbox[0] as f64,
                det.bbox[1] as f64,
                det.bbox[2] as f64,
                det.bbox[3] as f64,
            ]
        })
        .collect();

    let labels = dbscan(&points, eps, min_points);
    merge_clusters(detections, &labels)
}

/// Median of `sqrt(width * height)` over all boxes.
fn median_box_size(detections: &[Detection]) -> f64 {
    let sizes = detections
        .iter()
        .map(|det| {
            let width = (det.bbox[2] - det.bbox[0]) as f64;
            let height = (det.bbox[3] - det.bbox[1]) as f64;
            (width * height).sqrt()
        })
        .collect();
    median(sizes).unwrap_or(DEFAULT_CLUSTER_SIZE)
}

/// Classical DBSCAN over 4-D corner points under Euclidean distance.
///
/// Returns a label per point: a dense cluster id starting at 0, or -1 for
/// noise. Expansion converts noise points it reaches but never reassigns a
/// point already placed in a cluster.
fn dbscan(points: &[[f64; 4]], eps: f64, min_points: usize) -> Vec<i32> {
    let mut labels = vec![NOISE; points.len()];
    let mut current = 0;

    for i in 0..points.len() {
        if labels[i] != NOISE {
            continue;
        }

        let mut neighbors = region_query(points, i, eps);
        if neighbors.len() < min_points {
            continue;
        }

        labels[i] = current;
        let mut idx = 0;
        while idx < neighbors.len() {
            let point = neighbors[idx];
            if labels[point] == NOISE {
                labels[point] = current;
                let expansion = region_query(points, point, eps);
                if expansion.len() >= min_points {
                    neighbors.extend(expansion);
                }
            }
            idx += 1;
        }
        current += 1;
    }

    labels
}

/// Indices of all points within `eps` of `point`, the point itself included.
fn region_query(points: &[[f64; 4]], point: usize, eps: f64) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, other)| corner_distance(points[point], **other) <= eps)
        .map(|(i, _)| i)
        .collect()
}

/// Single pass grouping boxes by label, handling noise inline.
///
/// A noise box overlapping (IoU above the threshold) any box already grouped
/// is treated as a duplicate of that cluster and dropped outright; it does not
/// widen the cluster union. Noise boxes that overlap nothing stand as their
/// own faces, emitted in encounter order ahead of the merged clusters.
fn merge_clusters(detections: &[Detection], labels: &[i32]) -> Vec<[i32; 4]> {
    let cluster_count = labels.iter().max().map_or(0, |max| (max + 1).max(0) as usize);
    let mut clusters: Vec<Vec<[i32; 4]>> = vec![Vec::new(); cluster_count];
    let mut final_boxes = Vec::new();

    for (i, &label) in labels.iter().enumerate() {
        let bbox = detections[i].bbox;
        if label == NOISE {
            let absorbed = clusters
                .iter()
                .flatten()
                .any(|existing| iou(bbox, *existing) > IOU_THRESHOLD);
            if !absorbed {
                final_boxes.push(bbox);
            }
        } else {
            clusters[label as usize].push(bbox);
        }
    }

    for boxes in &clusters {
        if !boxes.is_empty() {
            final_boxes.push(union_box(boxes));
        }
    }

    final_boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [i32; 4]) -> Detection {
        Detection {
            bbox,
            confidence: 0.9,
        }
    }

    #[test]
    fn empty_input_yields_no_boxes() {
        assert!(cluster_boxes(&[]).is_empty());
    }

    #[test]
    fn single_detection_survives_as_its_own_box() {
        let boxes = cluster_boxes(&[det([100, 100, 180, 180])]);
        assert_eq!(boxes, vec![[100, 100, 180, 180]]);
    }

    #[test]
    fn jittered_duplicates_collapse_to_their_union() {
        // Five proposals for one face, jittered by a few pixels.
        let detections = [
            det([100, 100, 180, 180]),
            det([103, 100, 183, 180]),
            det([97, 103, 177, 183]),
            det([100, 97, 180, 177]),
            det([103, 103, 183, 183]),
        ];
        let boxes = cluster_boxes(&detections);
        assert_eq!(boxes, vec![[97, 97, 183, 183]]);
    }

    #[test]
    fn distant_groups_stay_separate() {
        let detections = [
            det([100, 100, 180, 180]),
            det([102, 102, 182, 182]),
            det([300, 300, 380, 380]),
            det([302, 302, 382, 382]),
        ];
        let boxes = cluster_boxes(&detections);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0], [100, 100, 182, 182]);
        assert_eq!(boxes[1], [300, 300, 382, 382]);
    }

    #[test]
    fn clustering_a_cluster_union_is_idempotent() {
        let detections = [
            det([100, 100, 180, 180]),
            det([103, 100, 183, 180]),
            det([97, 103, 177, 183]),
        ];
        let first = cluster_boxes(&detections);
        assert_eq!(first.len(), 1);
        let second = cluster_boxes(&[det(first[0])]);
        assert_eq!(second, first);
    }

    #[test]
    fn overlapping_noise_is_absorbed_without_widening_the_union() {
        // Four identical proposals form a cluster; a fifth box shifted by 36 px
        // overlaps well (IoU ~0.47) but sits outside the clustering radius
        // (corner distance ~50.9 vs eps 50).
        let detections = [
            det([0, 0, 100, 100]),
            det([0, 0, 100, 100]),
            det([0, 0, 100, 100]),
            det([0, 0, 100, 100]),
            det([36, 0, 136, 100]),
        ];
        let boxes = cluster_boxes(&detections);
        assert_eq!(boxes, vec![[0, 0, 100, 100]]);
    }

    #[test]
    fn noise_seen_before_any_cluster_keeps_its_own_box() {
        // Same geometry, but the stray box is scanned first: there is no
        // grouped box for it to be absorbed into yet.
        let detections = [
            det([36, 0, 136, 100]),
            det([0, 0, 100, 100]),
            det([0, 0, 100, 100]),
            det([0, 0, 100, 100]),
            det([0, 0, 100, 100]),
        ];
        let boxes = cluster_boxes(&detections);
        assert_eq!(boxes, vec![[36, 0, 136, 100], [0, 0, 100, 100]]);
    }

    #[test]
    fn far_noise_stands_alone() {
        let detections = [
            det([100, 100, 180, 180]),
            det([101, 101, 181, 181]),
            det([102, 100, 182, 180]),
            det([500, 500, 580, 580]),
        ];
        let boxes = cluster_boxes(&detections);
        assert_eq!(boxes.len(), 2);
        assert!(boxes.contains(&[500, 500, 580, 580]));
    }
}
