//! Ambient stack shared by every stage of the face-cloaking pipeline:
//! in-memory image codecs, ONNX Runtime session construction, and model-file
//! caching.

pub mod image_io;
pub mod model_cache;
pub mod numeric;
pub mod onnx_utils;

use ndarray::Array3;

/// Convert an 8-bit RGB image to an HWC float tensor in `[0,1]`, the
/// representation the perturbation engine and compositor do their math in.
pub fn rgb_u8_to_f32_hwc(image: &image::RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut out = Array3::<f32>::zeros((height as usize, width as usize, 3));
    for (x, y, px) in image.enumerate_pixels() {
        for c in 0..3 {
            out[[y as usize, x as usize, c]] = px.0[c] as f32 / 255.0;
        }
    }
    out
}

/// Convert an HWC float tensor in `[0,1]` back to an 8-bit RGB image,
/// clipping and rounding. The inverse of [`rgb_u8_to_f32_hwc`].
pub fn f32_hwc_to_rgb_u8(arr: &ndarray::ArrayView3<f32>) -> image::RgbImage {
    let (height, width, _) = arr.dim();
    let mut out = image::RgbImage::new(width as u32, height as u32);
    for (x, y, px) in out.enumerate_pixels_mut() {
        for c in 0..3 {
            let v = arr[[y as usize, x as usize, c]].clamp(0.0, 1.0);
            px.0[c] = (v * 255.0).round() as u8;
        }
    }
    out
}

/// Convert an 8-bit RGB image to a 112x112 BGR `u8` tensor laid out as the
/// FR/detector ONNX models expect: `[1, 3, 112, 112]`, channel order B,G,R.
pub fn to_bgr_chw(image: &image::RgbImage, size: u32) -> ndarray::Array4<f32> {
    let resized = image::imageops::resize(
        image,
        size,
        size,
        image::imageops::FilterType::Triangle,
    );
    let mut out = ndarray::Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, px) in resized.enumerate_pixels() {
        let [r, g, b] = px.0;
        out[[0, 0, y as usize, x as usize]] = b as f32;
        out[[0, 1, y as usize, x as usize]] = g as f32;
        out[[0, 2, y as usize, x as usize]] = r as f32;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn to_bgr_chw_swaps_channel_order() {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let tensor = to_bgr_chw(&img, 4);
        assert_eq!(tensor[[0, 0, 0, 0]], 30.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 20.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 10.0);
    }

    #[test]
    fn float_roundtrip_preserves_pixel_values() {
        let img = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let arr = rgb_u8_to_f32_hwc(&img);
        assert_eq!(arr.dim(), (2, 3, 3));
        let back = f32_hwc_to_rgb_u8(&arr.view());
        assert_eq!(back.get_pixel(1, 1), &Rgb([10, 20, 30]));
    }
}
