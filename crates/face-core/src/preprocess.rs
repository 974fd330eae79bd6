//! Image to planar float tensor conversion.
//!
//! The model consumes a `1 x 3 x H x W` float tensor: all red samples
//! (row-major), then all green, then all blue, each scaled to `[0, 1]`. The
//! preprocessor resizes the decoded image to the model input size, fills a
//! reusable staging buffer through either a SIMD row kernel (8-bit RGBA
//! frames) or a generic per-pixel fallback split across worker threads, and
//! finally copies the staged floats into the session-owned input tensor.

use std::sync::Mutex;
use std::thread;

use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbaImage};

use crate::profile::{INPUT_HEIGHT, INPUT_TENSOR_LEN, INPUT_WIDTH};
use crate::simd::{self, RowFn};

/// Converts decoded images into the model's planar input layout.
///
/// The SIMD row kernel is detected once at construction and reused for every
/// request. The staging-buffer free list is shared process-wide when the
/// preprocessor itself is.
pub struct Preprocessor {
    row_fn: Option<RowFn>,
    workers: usize,
    buffers: Mutex<Vec<Vec<f32>>>,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            row_fn: simd::detect_row_fn(),
            workers: num_cpus::get().max(1),
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Resize an image to the exact model input dimensions.
    ///
    /// Triangle (bilinear) filtering matches the resize the model was trained
    /// against; changing it shifts confidence scores.
    pub fn resize(&self, image: &DynamicImage) -> DynamicImage {
        image.resize_exact(INPUT_WIDTH as u32, INPUT_HEIGHT as u32, FilterType::Triangle)
    }

    /// Fill the session input tensor from a resized image.
    ///
    /// `resized` must already have the model input dimensions and `dst` the
    /// exact tensor length. The staging buffer is returned to the free list on
    /// every path out of this function.
    pub fn fill_input(&self, resized: &DynamicImage, dst: &mut [f32]) {
        debug_assert_eq!(
            (resized.width() as usize, resized.height() as usize),
            (INPUT_WIDTH, INPUT_HEIGHT)
        );
        debug_assert_eq!(dst.len(), INPUT_TENSOR_LEN);

        let mut staging = self.take_buffer();
        match (resized, self.row_fn) {
            (DynamicImage::ImageRgba8(frame), Some(row_fn)) => {
                fill_planar_rows(frame, row_fn, staging.data());
            }
            _ => self.fill_planar_generic(resized, staging.data()),
        }
        dst.copy_from_slice(staging.data());
    }

    fn take_buffer(&self) -> StagingBuffer<'_> {
        let data = match self.buffers.lock() {
            Ok(mut free) => free.pop(),
            Err(_) => None,
        }
        .unwrap_or_else(|| vec![0.0; INPUT_TENSOR_LEN]);
        StagingBuffer {
            pool: &self.buffers,
            data: Some(data),
        }
    }

    /// Per-pixel path for frames that are not 8-bit RGBA.
    ///
    /// Rows are split into disjoint ranges, one worker per range, each writing
    /// only its own rows across all three planes.
    fn fill_planar_generic(&self, image: &DynamicImage, buffer: &mut [f32]) {
        let channel_size = INPUT_WIDTH * INPUT_HEIGHT;
        let (red, rest) = buffer.split_at_mut(channel_size);
        let (green, blue) = rest.split_at_mut(channel_size);

        let workers = self.workers.min(INPUT_HEIGHT).max(1);
        let rows_per_worker = INPUT_HEIGHT.div_ceil(workers);
        let chunk = rows_per_worker * INPUT_WIDTH;

        thread::scope(|scope| {
            for (worker, ((red_rows, green_rows), blue_rows)) in red
                .chunks_mut(chunk)
                .zip(green.chunks_mut(chunk))
                .zip(blue.chunks_mut(chunk))
                .enumerate()
            {
                let start_row = worker * rows_per_worker;
                scope.spawn(move || {
                    let rows = red_rows.len() / INPUT_WIDTH;
                    for y in 0..rows {
                        for x in 0..INPUT_WIDTH {
                            let pixel = image.get_pixel(x as u32, (start_row + y) as u32);
                            let i = y * INPUT_WIDTH + x;
                            red_rows[i] = pixel[0] as f32 / 255.0;
                            green_rows[i] = pixel[1] as f32 / 255.0;
                            blue_rows[i] = pixel[2] as f32 / 255.0;
                        }
                    }
                });
            }
        });
    }
}

/// SIMD fast path over an interleaved RGBA frame.
///
/// Each destination row is produced by three kernel calls, one per channel,
/// with the source pointer offset by the channel index.
fn fill_planar_rows(frame: &RgbaImage, row_fn: RowFn, buffer: &mut [f32]) {
    let channel_size = INPUT_WIDTH * INPUT_HEIGHT;
    let stride = INPUT_WIDTH * 4;
    let src = frame.as_raw();

    let (red, rest) = buffer.split_at_mut(channel_size);
    let (green, blue) = rest.split_at_mut(channel_size);

    for y in 0..INPUT_HEIGHT {
        let row = &src[y * stride..(y + 1) * stride];
        let out = y * INPUT_WIDTH;
        // SAFETY: the row slice holds INPUT_WIDTH * 4 bytes and each kernel
        // reads at most that many from its offset pointer; every destination
        // slice holds INPUT_WIDTH floats.
        unsafe {
            row_fn(row.as_ptr(), red[out..out + INPUT_WIDTH].as_mut_ptr(), INPUT_WIDTH);
            row_fn(
                row.as_ptr().add(1),
                green[out..out + INPUT_WIDTH].as_mut_ptr(),
                INPUT_WIDTH,
            );
            row_fn(
                row.as_ptr().add(2),
                blue[out..out + INPUT_WIDTH].as_mut_ptr(),
                INPUT_WIDTH,
            );
        }
    }
}

/// Exact-size staging buffer leased from the preprocessor's free list.
struct StagingBuffer<'a> {
    pool: &'a Mutex<Vec<Vec<f32>>>,
    data: Option<Vec<f32>>,
}

impl StagingBuffer<'_> {
    fn data(&mut self) -> &mut [f32] {
        self.data.as_mut().expect("staging buffer taken").as_mut_slice()
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        if let (Some(data), Ok(mut free)) = (self.data.take(), self.pool.lock()) {
            free.push(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid_rgba(r: u8, g: u8, b: u8) -> RgbaImage {
        RgbaImage::from_pixel(
            INPUT_WIDTH as u32,
            INPUT_HEIGHT as u32,
            Rgba([r, g, b, 255]),
        )
    }

    fn patterned_rgba() -> RgbaImage {
        RgbaImage::from_fn(INPUT_WIDTH as u32, INPUT_HEIGHT as u32, |x, y| {
            Rgba([
                (x * 7 + y) as u8,
                (x + y * 13) as u8,
                (x * 3 + y * 5) as u8,
                255,
            ])
        })
    }

    #[test]
    fn output_is_planar_and_normalized() {
        let preprocessor = Preprocessor::new();
        let image = DynamicImage::ImageRgba8(solid_rgba(255, 128, 0));
        let mut tensor = vec![0.0f32; INPUT_TENSOR_LEN];
        preprocessor.fill_input(&image, &mut tensor);

        let channel_size = INPUT_WIDTH * INPUT_HEIGHT;
        for value in &tensor {
            assert!((0.0..=1.0).contains(value));
        }
        assert!(tensor[..channel_size].iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert!(tensor[channel_size..2 * channel_size]
            .iter()
            .all(|v| (v - 128.0 / 255.0).abs() < 1e-6));
        assert!(tensor[2 * channel_size..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn generic_path_handles_rgb_frames() {
        let preprocessor = Preprocessor::new();
        let rgb = image::RgbImage::from_pixel(
            INPUT_WIDTH as u32,
            INPUT_HEIGHT as u32,
            image::Rgb([10, 20, 30]),
        );
        let image = DynamicImage::ImageRgb8(rgb);
        let mut tensor = vec![0.0f32; INPUT_TENSOR_LEN];
        preprocessor.fill_input(&image, &mut tensor);

        let channel_size = INPUT_WIDTH * INPUT_HEIGHT;
        assert!((tensor[0] - 10.0 / 255.0).abs() < 1e-6);
        assert!((tensor[channel_size] - 20.0 / 255.0).abs() < 1e-6);
        assert!((tensor[2 * channel_size] - 30.0 / 255.0).abs() < 1e-6);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn simd_and_generic_paths_agree_within_one_ulp() {
        let preprocessor = Preprocessor::new();
        let Some(row_fn) = preprocessor.row_fn else {
            return;
        };

        let frame = patterned_rgba();
        let mut fast = vec![0.0f32; INPUT_TENSOR_LEN];
        fill_planar_rows(&frame, row_fn, &mut fast);

        let mut scalar = vec![0.0f32; INPUT_TENSOR_LEN];
        preprocessor.fill_planar_generic(&DynamicImage::ImageRgba8(frame), &mut scalar);

        for (i, (a, b)) in fast.iter().zip(scalar.iter()).enumerate() {
            assert!(
                (a - b).abs() <= f32::EPSILON,
                "paths diverged at {i}: {a} vs {b}"
            );
        }
    }

    #[test]
    fn staging_buffer_returns_to_free_list() {
        let preprocessor = Preprocessor::new();
        {
            let _buffer = preprocessor.take_buffer();
            assert!(preprocessor.buffers.lock().unwrap().is_empty());
        }
        assert_eq!(preprocessor.buffers.lock().unwrap().len(), 1);

        // The recycled buffer is handed out again instead of allocating.
        {
            let _buffer = preprocessor.take_buffer();
            assert!(preprocessor.buffers.lock().unwrap().is_empty());
        }
        assert_eq!(preprocessor.buffers.lock().unwrap().len(), 1);
    }

    #[test]
    fn resize_produces_model_input_dimensions() {
        let preprocessor = Preprocessor::new();
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(512, 384, Rgba([5, 5, 5, 255])));
        let resized = preprocessor.resize(&image);
        assert_eq!(resized.width() as usize, INPUT_WIDTH);
        assert_eq!(resized.height() as usize, INPUT_HEIGHT);
    }
}
