//! Shared floating-point image math used by the perturbation engine, the
//! compositor, and the analysis renderer: Gaussian blur, Sobel gradients,
//! and area/bilinear resampling, all operating directly on `ndarray`
//! tensors in `[0,1]`/unbounded float space rather than the 8-bit pixel
//! buffers `image`/`imageproc` are built around. The gradient- and
//! heatmap-valued data these stages pass around (signed perturbations,
//! edge-weight maps, difference images) lives in float space end to end, so
//! working on `Array2`/`Array3` directly avoids a lossy round-trip through
//! `u8` on every intermediate step.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Separable Gaussian blur of a single-channel plane, edge-clamped at the
/// border (replicate padding), matching OpenCV's default `BORDER_REFLECT101`
/// closely enough for this pipeline's purposes (imperceptibility smoothing,
/// not exact numerical parity).
#[must_use]
pub fn gaussian_blur_2d(data: &ArrayView2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return data.to_owned();
    }
    let kernel = gaussian_kernel_1d(sigma);
    let (h, w) = data.dim();

    // Horizontal pass.
    let mut tmp = Array2::<f32>::zeros((h, w));
    let radius = (kernel.len() / 2) as i64;
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &weight) in kernel.iter().enumerate() {
                let dx = k as i64 - radius;
                let sx = clamp_index(x as i64 + dx, w);
                acc += weight * data[[y, sx]];
            }
            tmp[[y, x]] = acc;
        }
    }

    // Vertical pass.
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &weight) in kernel.iter().enumerate() {
                let dy = k as i64 - radius;
                let sy = clamp_index(y as i64 + dy, h);
                acc += weight * tmp[[sy, x]];
            }
            out[[y, x]] = acc;
        }
    }
    out
}

/// Blur every channel of an HWC tensor independently with the same sigma.
#[must_use]
pub fn gaussian_blur_3d(data: &ArrayView3<f32>, sigma: f32) -> Array3<f32> {
    let (h, w, c) = data.dim();
    let mut out = Array3::<f32>::zeros((h, w, c));
    for ch in 0..c {
        let plane = data.slice(ndarray::s![.., .., ch]).to_owned();
        let blurred = gaussian_blur_2d(&plane.view(), sigma);
        out.slice_mut(ndarray::s![.., .., ch]).assign(&blurred);
    }
    out
}

fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    let radius = ((sigma * 3.0).ceil() as i64).max(1);
    let size = (2 * radius + 1) as usize;
    let mut kernel = vec![0.0f32; size];
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        *k = (-(x * x) / two_sigma_sq).exp();
        sum += *k;
    }
    if sum > 0.0 {
        for k in &mut kernel {
            *k /= sum;
        }
    }
    kernel
}

fn clamp_index(i: i64, len: usize) -> usize {
    i.clamp(0, len as i64 - 1) as usize
}

/// Sobel gradient magnitude of a single-channel plane (3x3 kernels, edge
/// clamp), unnormalized.
#[must_use]
pub fn sobel_magnitude(gray: &ArrayView2<f32>) -> Array2<f32> {
    let (h, w) = gray.dim();
    let mut out = Array2::<f32>::zeros((h, w));

    let gx_kernel = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
    let gy_kernel = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

    for y in 0..h {
        for x in 0..w {
            let mut gx = 0.0f32;
            let mut gy = 0.0f32;
            for (ky, row) in gx_kernel.iter().enumerate() {
                for (kx, &wx) in row.iter().enumerate() {
                    let sy = clamp_index(y as i64 + ky as i64 - 1, h);
                    let sx = clamp_index(x as i64 + kx as i64 - 1, w);
                    let v = gray[[sy, sx]];
                    gx += wx * v;
                    gy += gy_kernel[ky][kx] * v;
                }
            }
            out[[y, x]] = (gx * gx + gy * gy).sqrt();
        }
    }
    out
}

/// Rec.601 luma from an HWC RGB float tensor.
#[must_use]
pub fn luminance(rgb: &ArrayView3<f32>) -> Array2<f32> {
    const LUM_R: f32 = 0.299;
    const LUM_G: f32 = 0.587;
    const LUM_B: f32 = 0.114;
    let (h, w, _) = rgb.dim();
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            out[[y, x]] =
                LUM_R * rgb[[y, x, 0]] + LUM_G * rgb[[y, x, 1]] + LUM_B * rgb[[y, x, 2]];
        }
    }
    out
}

/// Area (box-filter) resample of an HWC tensor to `(out_h, out_w)`, used for
/// downscaling. Each output pixel averages the weighted overlap of its
/// corresponding continuous source footprint, matching `cv2.INTER_AREA`'s
/// intent without requiring exact integer scale factors.
#[must_use]
pub fn resize_area(src: &ArrayView3<f32>, out_h: usize, out_w: usize) -> Array3<f32> {
    let (in_h, in_w, c) = src.dim();
    if in_h == out_h && in_w == out_w {
        return src.to_owned();
    }
    let scale_y = in_h as f32 / out_h.max(1) as f32;
    let scale_x = in_w as f32 / out_w.max(1) as f32;

    let mut out = Array3::<f32>::zeros((out_h, out_w, c));
    for oy in 0..out_h {
        let y0 = oy as f32 * scale_y;
        let y1 = ((oy + 1) as f32 * scale_y).min(in_h as f32);
        for ox in 0..out_w {
            let x0 = ox as f32 * scale_x;
            let x1 = ((ox + 1) as f32 * scale_x).min(in_w as f32);
            for ch in 0..c {
                out[[oy, ox, ch]] = box_average(src, y0, y1, x0, x1, ch, in_h, in_w);
            }
        }
    }
    out
}

fn box_average(
    src: &ArrayView3<f32>,
    y0: f32,
    y1: f32,
    x0: f32,
    x1: f32,
    ch: usize,
    in_h: usize,
    in_w: usize,
) -> f32 {
    let y0 = y0.max(0.0);
    let x0 = x0.max(0.0);
    let y1 = y1.max(y0 + 1e-6);
    let x1 = x1.max(x0 + 1e-6);

    let y_start = y0.floor() as usize;
    let y_end = (y1.ceil() as usize).min(in_h).max(y_start + 1);
    let x_start = x0.floor() as usize;
    let x_end = (x1.ceil() as usize).min(in_w).max(x_start + 1);

    let mut acc = 0.0f32;
    let mut weight_sum = 0.0f32;
    for y in y_start..y_end {
        let wy = overlap(y as f32, y as f32 + 1.0, y0, y1);
        if wy <= 0.0 {
            continue;
        }
        for x in x_start..x_end {
            let wx = overlap(x as f32, x as f32 + 1.0, x0, x1);
            if wx <= 0.0 {
                continue;
            }
            let weight = wy * wx;
            acc += weight * src[[y, x, ch]];
            weight_sum += weight;
        }
    }
    if weight_sum > 0.0 {
        acc / weight_sum
    } else {
        src[[y_start.min(in_h - 1), x_start.min(in_w - 1), ch]]
    }
}

fn overlap(a0: f32, a1: f32, b0: f32, b1: f32) -> f32 {
    (a1.min(b1) - a0.max(b0)).max(0.0)
}

/// Bilinear resample of an HWC tensor to `(out_h, out_w)`, used for
/// upscaling the perturbation back to crop resolution.
#[must_use]
pub fn resize_bilinear(src: &ArrayView3<f32>, out_h: usize, out_w: usize) -> Array3<f32> {
    let (in_h, in_w, c) = src.dim();
    if in_h == out_h && in_w == out_w {
        return src.to_owned();
    }
    let mut out = Array3::<f32>::zeros((out_h, out_w, c));

    let scale_y = if out_h > 1 {
        (in_h - 1).max(1) as f32 / (out_h - 1).max(1) as f32
    } else {
        0.0
    };
    let scale_x = if out_w > 1 {
        (in_w - 1).max(1) as f32 / (out_w - 1).max(1) as f32
    } else {
        0.0
    };

    for oy in 0..out_h {
        let sy = (oy as f32 * scale_y).min((in_h - 1) as f32);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(in_h - 1);
        let fy = sy - y0 as f32;

        for ox in 0..out_w {
            let sx = (ox as f32 * scale_x).min((in_w - 1) as f32);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(in_w - 1);
            let fx = sx - x0 as f32;

            for ch in 0..c {
                let v00 = src[[y0, x0, ch]];
                let v01 = src[[y0, x1, ch]];
                let v10 = src[[y1, x0, ch]];
                let v11 = src[[y1, x1, ch]];
                let top = v00 * (1.0 - fx) + v01 * fx;
                let bot = v10 * (1.0 - fx) + v11 * fx;
                out[[oy, ox, ch]] = top * (1.0 - fy) + bot * fy;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn gaussian_blur_preserves_constant_plane() {
        let plane = Array2::<f32>::from_elem((10, 10), 0.5);
        let blurred = gaussian_blur_2d(&plane.view(), 2.0);
        for v in blurred.iter() {
            assert!((v - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn sobel_of_flat_plane_is_zero() {
        let plane = Array2::<f32>::from_elem((10, 10), 0.3);
        let mag = sobel_magnitude(&plane.view());
        for v in mag.iter() {
            assert!(*v < 1e-5);
        }
    }

    #[test]
    fn sobel_detects_vertical_edge() {
        let mut plane = Array2::<f32>::zeros((10, 10));
        for y in 0..10 {
            for x in 5..10 {
                plane[[y, x]] = 1.0;
            }
        }
        let mag = sobel_magnitude(&plane.view());
        assert!(mag[[5, 5]] > 0.5);
        assert!(mag[[5, 0]] < 1e-5);
    }

    #[test]
    fn resize_area_downscales_dimensions() {
        let src = Array3::<f32>::from_elem((20, 20, 3), 0.25);
        let out = resize_area(&src.view(), 10, 10);
        assert_eq!(out.dim(), (10, 10, 3));
        assert!((out[[5, 5, 0]] - 0.25).abs() < 1e-5);
    }

    #[test]
    fn resize_bilinear_upscales_dimensions() {
        let src = array![[[0.0f32], [1.0f32]], [[0.0f32], [1.0f32]]];
        let out = resize_bilinear(&src.view(), 4, 4);
        assert_eq!(out.dim(), (4, 4, 1));
        assert!(out[[0, 0, 0]] < out[[0, 3, 0]]);
    }

    #[test]
    fn luminance_of_white_is_one() {
        let rgb = Array3::<f32>::from_elem((2, 2, 3), 1.0);
        let lum = luminance(&rgb.view());
        for v in lum.iter() {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }
}
