//! Vectorized row kernels for planar tensor conversion.
//!
//! Each kernel walks one source row of interleaved 8-bit samples with a byte
//! stride of 4, widens every fourth byte to f32, scales by 1/255, and writes a
//! contiguous run of floats. The caller selects the channel by offsetting the
//! source pointer (R + 0, G + 1, B + 2). All loads and stores are unaligned;
//! the vector loop stops one full group short of the row end so the widest
//! load never reads past the source slice, and a scalar tail finishes the row.

/// Converts `width` strided samples starting at `src` into floats at `dst`.
///
/// # Safety
/// `src` must be readable for `width * 4` bytes and `dst` writable for
/// `width` floats.
pub(crate) type RowFn = unsafe fn(src: *const u8, dst: *mut f32, width: usize);

/// Pick the widest kernel the CPU supports, once per process.
///
/// Returns `None` when no vector kernel is available and the generic scalar
/// path should be used instead.
pub(crate) fn detect_row_fn() -> Option<RowFn> {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            return Some(row_avx512);
        }
        if is_x86_feature_detected!("avx2") {
            return Some(row_avx2);
        }
        if is_x86_feature_detected!("sse4.1") {
            return Some(row_sse41);
        }
    }
    None
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn row_avx512(src: *const u8, dst: *mut f32, width: usize) {
    use std::arch::x86_64::*;

    const LANES: usize = 16;
    let scale = _mm512_set1_ps(1.0 / 255.0);
    let mask = _mm512_set1_epi32(0xFF);

    let mut x = 0;
    while x + LANES < width {
        let pixels = _mm512_loadu_si512(src.add(x * 4) as *const _);
        let channel = _mm512_and_epi32(pixels, mask);
        let values = _mm512_mul_ps(_mm512_cvtepi32_ps(channel), scale);
        _mm512_storeu_ps(dst.add(x), values);
        x += LANES;
    }
    while x < width {
        *dst.add(x) = *src.add(x * 4) as f32 * (1.0 / 255.0);
        x += 1;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn row_avx2(src: *const u8, dst: *mut f32, width: usize) {
    use std::arch::x86_64::*;

    const LANES: usize = 8;
    let scale = _mm256_set1_ps(1.0 / 255.0);
    let mask = _mm256_set1_epi32(0xFF);

    let mut x = 0;
    while x + LANES < width {
        let pixels = _mm256_loadu_si256(src.add(x * 4) as *const _);
        let channel = _mm256_and_si256(pixels, mask);
        let values = _mm256_mul_ps(_mm256_cvtepi32_ps(channel), scale);
        _mm256_storeu_ps(dst.add(x), values);
        x += LANES;
    }
    while x < width {
        *dst.add(x) = *src.add(x * 4) as f32 * (1.0 / 255.0);
        x += 1;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.1")]
unsafe fn row_sse41(src: *const u8, dst: *mut f32, width: usize) {
    use std::arch::x86_64::*;

    const LANES: usize = 4;
    let scale = _mm_set1_ps(1.0 / 255.0);
    let mask = _mm_set1_epi32(0xFF);

    let mut x = 0;
    while x + LANES < width {
        let pixels = _mm_loadu_si128(src.add(x * 4) as *const _);
        let channel = _mm_and_si128(pixels, mask);
        let values = _mm_mul_ps(_mm_cvtepi32_ps(channel), scale);
        _mm_storeu_ps(dst.add(x), values);
        x += LANES;
    }
    while x < width {
        *dst.add(x) = *src.add(x * 4) as f32 * (1.0 / 255.0);
        x += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn kernels_match_scalar_reference() {
        let width = 131; // Deliberately not a multiple of any lane count.
        let mut src = vec![0u8; width * 4];
        for (i, byte) in src.iter_mut().enumerate() {
            *byte = (i * 7 % 256) as u8;
        }

        let mut reference = vec![0.0f32; width];
        for x in 0..width {
            reference[x] = src[x * 4] as f32 / 255.0;
        }

        let mut kernels: Vec<(&str, RowFn)> = Vec::new();
        if is_x86_feature_detected!("avx512f") {
            kernels.push(("avx512", row_avx512));
        }
        if is_x86_feature_detected!("avx2") {
            kernels.push(("avx2", row_avx2));
        }
        if is_x86_feature_detected!("sse4.1") {
            kernels.push(("sse4.1", row_sse41));
        }

        for (name, kernel) in kernels {
            let mut out = vec![0.0f32; width];
            unsafe { kernel(src.as_ptr(), out.as_mut_ptr(), width) };
            for (x, (got, want)) in out.iter().zip(reference.iter()).enumerate() {
                assert!(
                    (got - want).abs() <= f32::EPSILON,
                    "{name} kernel diverged at {x}: {got} vs {want}"
                );
            }
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn kernels_honor_channel_offsets() {
        let Some(kernel) = detect_row_fn() else {
            return;
        };

        let width = 64;
        let mut src = vec![0u8; width * 4];
        for px in 0..width {
            src[px * 4] = 10;
            src[px * 4 + 1] = 20;
            src[px * 4 + 2] = 30;
            src[px * 4 + 3] = 255;
        }

        for (offset, expected) in [(0usize, 10.0f32), (1, 20.0), (2, 30.0)] {
            let mut out = vec![0.0f32; width];
            unsafe { kernel(src.as_ptr().add(offset), out.as_mut_ptr(), width) };
            for value in &out {
                assert!((value - expected / 255.0).abs() <= f32::EPSILON);
            }
        }
    }
}
