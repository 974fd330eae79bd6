//! Decoding of the raw strided model output into candidate detections.
//!
//! The model emits a flat `C x G` buffer: planes 0..=3 hold box center-x,
//! center-y, width, and height in model-input pixels, plane 4 the face
//! confidence. Cells below the confidence threshold are dropped, the rest are
//! converted to corner boxes in original-image space. Decoding is split into
//! fixed-size chunks over a small worker pool since the grid is large and the
//! per-cell work is trivial.

use std::thread;

use thiserror::Error;

use crate::profile::{CONF_THRESHOLD, INPUT_HEIGHT, INPUT_WIDTH};

/// One candidate face: a pixel-space corner box plus its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in original-image pixels.
    pub bbox: [i32; 4],
    pub confidence: f32,
}

#[derive(Debug, Error)]
#[error("model output has {actual} values, expected {channels}x{grid}")]
pub struct OutputShapeError {
    pub channels: usize,
    pub grid: usize,
    pub actual: usize,
}

/// Grid cells decoded per work unit.
const CHUNK_SIZE: usize = 512;

/// Decode the flat model output into confidence-sorted detections.
///
/// `channels`/`grid` describe the output head; a buffer whose length does not
/// match is rejected outright rather than partially decoded.
pub fn decode_predictions(
    predictions: &[f32],
    channels: usize,
    grid: usize,
    orig_width: u32,
    orig_height: u32,
) -> Result<Vec<Detection>, OutputShapeError> {
    if channels < 5 || predictions.len() != channels * grid {
        return Err(OutputShapeError {
            channels,
            grid,
            actual: predictions.len(),
        });
    }

    let workers = num_cpus::get().clamp(1, grid.div_ceil(CHUNK_SIZE));
    let mut detections: Vec<Detection> = Vec::with_capacity(100);

    thread::scope(|scope| {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<usize>(workers);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<Vec<Detection>>();

        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                let mut local = Vec::new();
                for start in job_rx {
                    let end = (start + CHUNK_SIZE).min(grid);
                    for i in start..end {
                        let confidence = predictions[4 * grid + i];
                        if confidence >= CONF_THRESHOLD {
                            local.push(Detection {
                                bbox: decode_bbox(
                                    predictions[i],
                                    predictions[grid + i],
                                    predictions[2 * grid + i],
                                    predictions[3 * grid + i],
                                    orig_width as f32,
                                    orig_height as f32,
                                ),
                                confidence,
                            });
                        }
                    }
                }
                if !local.is_empty() {
                    let _ = result_tx.send(local);
                }
            });
        }
        drop(result_tx);

        for start in (0..grid).step_by(CHUNK_SIZE) {
            if job_tx.send(start).is_err() {
                break;
            }
        }
        drop(job_tx);

        for chunk in result_rx {
            detections.extend(chunk);
        }
    });

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(detections)
}

/// Center-form box in model-input pixels to a clamped corner box in
/// original-image pixels.
fn decode_bbox(cx: f32, cy: f32, w: f32, h: f32, orig_width: f32, orig_height: f32) -> [i32; 4] {
    let scale_x = orig_width / INPUT_WIDTH as f32;
    let scale_y = orig_height / INPUT_HEIGHT as f32;

    let x1 = (cx - w / 2.0) * scale_x;
    let y1 = (cy - h / 2.0) * scale_y;
    let x2 = (cx + w / 2.0) * scale_x;
    let y2 = (cy + h / 2.0) * scale_y;

    [
        x1.clamp(0.0, orig_width) as i32,
        y1.clamp(0.0, orig_height) as i32,
        x2.clamp(0.0, orig_width) as i32,
        y2.clamp(0.0, orig_height) as i32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNELS: usize = 5;
    const GRID: usize = 1344;

    fn empty_output() -> Vec<f32> {
        vec![0.0; CHANNELS * GRID]
    }

    fn put_cell(out: &mut [f32], i: usize, cx: f32, cy: f32, w: f32, h: f32, conf: f32) {
        out[i] = cx;
        out[GRID + i] = cy;
        out[2 * GRID + i] = w;
        out[3 * GRID + i] = h;
        out[4 * GRID + i] = conf;
    }

    #[test]
    fn rejects_length_mismatch() {
        let out = vec![0.0; CHANNELS * GRID - 1];
        let err = decode_predictions(&out, CHANNELS, GRID, 512, 512).unwrap_err();
        assert_eq!(err.actual, CHANNELS * GRID - 1);
        assert_eq!(err.channels, CHANNELS);
        assert_eq!(err.grid, GRID);
    }

    #[test]
    fn rejects_missing_confidence_plane() {
        let out = vec![0.0; 4 * GRID];
        assert!(decode_predictions(&out, 4, GRID, 512, 512).is_err());
    }

    #[test]
    fn empty_grid_yields_no_detections() {
        let out = empty_output();
        let detections = decode_predictions(&out, CHANNELS, GRID, 512, 512).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn filters_below_threshold_and_sorts_descending() {
        let mut out = empty_output();
        put_cell(&mut out, 10, 128.0, 128.0, 64.0, 64.0, 0.85);
        put_cell(&mut out, 700, 64.0, 64.0, 32.0, 32.0, 0.95);
        put_cell(&mut out, 1200, 128.0, 128.0, 64.0, 64.0, CONF_THRESHOLD - 0.01);

        let detections = decode_predictions(&out, CHANNELS, GRID, 512, 512).unwrap();
        assert_eq!(detections.len(), 2);
        assert!(detections[0].confidence >= detections[1].confidence);
        assert!((detections[0].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn keeps_cells_exactly_at_threshold() {
        let mut out = empty_output();
        put_cell(&mut out, 3, 128.0, 128.0, 64.0, 64.0, CONF_THRESHOLD);
        let detections = decode_predictions(&out, CHANNELS, GRID, 256, 256).unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn rescales_to_original_image_space() {
        let mut out = empty_output();
        // Center box covering the middle quarter of the model input.
        let cx = INPUT_WIDTH as f32 / 2.0;
        let cy = INPUT_HEIGHT as f32 / 2.0;
        put_cell(
            &mut out,
            0,
            cx,
            cy,
            INPUT_WIDTH as f32 / 2.0,
            INPUT_HEIGHT as f32 / 2.0,
            0.9,
        );

        // Original image is twice the model input in each dimension.
        let orig_w = (INPUT_WIDTH * 2) as u32;
        let orig_h = (INPUT_HEIGHT * 2) as u32;
        let detections = decode_predictions(&out, CHANNELS, GRID, orig_w, orig_h).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(
            detections[0].bbox,
            [
                (INPUT_WIDTH / 2) as i32,
                (INPUT_HEIGHT / 2) as i32,
                (3 * INPUT_WIDTH / 2) as i32,
                (3 * INPUT_HEIGHT / 2) as i32,
            ]
        );
    }

    #[test]
    fn clamps_boxes_to_image_bounds() {
        let mut out = empty_output();
        // Box sticking out past every edge of the model input.
        put_cell(&mut out, 0, 0.0, 0.0, 600.0, 600.0, 0.9);
        put_cell(
            &mut out,
            1,
            INPUT_WIDTH as f32,
            INPUT_HEIGHT as f32,
            600.0,
            600.0,
            0.9,
        );

        let detections = decode_predictions(&out, CHANNELS, GRID, 512, 480).unwrap();
        for det in &detections {
            assert!(det.bbox[0] >= 0 && det.bbox[2] <= 512);
            assert!(det.bbox[1] >= 0 && det.bbox[3] <= 480);
            assert!(det.bbox[0] <= det.bbox[2]);
            assert!(det.bbox[1] <= det.bbox[3]);
        }
    }
}
