//! In-memory image decode/encode.
//!
//! Unlike the file-path-based I/O this module is adapted from, `cloak()` is a
//! pure in-memory function: every call here takes and returns byte buffers,
//! never touches a path. JPEG uses mozjpeg (3-5x faster than pure-Rust
//! decode/encode); PNG and anything else falls through to the `image` crate.

use cloak_common::ImageIoError;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use std::io::Cursor;

/// Decode `bytes` to an oriented, alpha-flattened RGB image.
///
/// Applies the EXIF `Orientation` tag (if present) before returning, so pixel
/// rows/columns already match the intended viewing orientation. Images
/// without EXIF data (e.g. PNG) pass through unrotated. 4-channel input is
/// flattened over black; any other color mode is converted to 3-channel RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ImageIoError> {
    let orientation = read_exif_orientation(bytes);

    let img = if looks_like_jpeg(bytes) {
        decode_jpeg_mozjpeg(bytes).or_else(|_| decode_with_image_crate(bytes))?
    } else {
        decode_with_image_crate(bytes)?
    };

    Ok(apply_orientation(img, orientation))
}

/// Encode an RGB image to bytes in the requested format.
pub fn encode_image(
    image: &RgbImage,
    format: cloak_common::OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, ImageIoError> {
    use cloak_common::OutputFormat;
    match format {
        OutputFormat::Jpeg => encode_jpeg_mozjpeg(image, quality),
        OutputFormat::Png => encode_png(image),
    }
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xD8
}

fn decode_jpeg_mozjpeg(bytes: &[u8]) -> Result<RgbImage, ImageIoError> {
    let d = mozjpeg::Decompress::new_mem(bytes)
        .map_err(|e| ImageIoError::Decode(format!("mozjpeg init failed: {e}")))?;
    let (width, height) = (d.width(), d.height());

    let mut rgb = d
        .rgb()
        .map_err(|e| ImageIoError::Decode(format!("mozjpeg rgb() failed: {e}")))?;
    let data = rgb
        .read_scanlines()
        .ok_or_else(|| ImageIoError::Decode("mozjpeg failed to read scanlines".into()))?;

    ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| ImageIoError::Decode("mozjpeg output did not fill the buffer".into()))
}

fn decode_with_image_crate(bytes: &[u8]) -> Result<RgbImage, ImageIoError> {
    let img = image::load_from_memory(bytes)?;
    Ok(flatten_alpha_over_black(img))
}

/// 4-channel input is flattened over a black background; anything else is
/// converted straight to RGB.
fn flatten_alpha_over_black(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgba8(rgba) => {
            let (w, h) = rgba.dimensions();
            let mut out = RgbImage::new(w, h);
            for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
                let [r, g, b, a] = src.0;
                let alpha = a as f32 / 255.0;
                dst.0 = [
                    (r as f32 * alpha).round() as u8,
                    (g as f32 * alpha).round() as u8,
                    (b as f32 * alpha).round() as u8,
                ];
            }
            out
        }
        other => other.to_rgb8(),
    }
}

fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = exif::Reader::new();
    match reader.read_from_container(&mut cursor) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

/// Apply the EXIF orientation transform. Tag values 1-8 per the standard;
/// anything else (including missing EXIF) is treated as identity.
fn apply_orientation(img: RgbImage, orientation: u32) -> RgbImage {
    use image::imageops::{flip_horizontal, flip_vertical, rotate180, rotate270, rotate90};

    match orientation {
        1 => img,
        2 => flip_horizontal(&img),
        3 => rotate180(&img),
        4 => flip_vertical(&img),
        5 => flip_horizontal(&rotate90(&img)),
        6 => rotate90(&img),
        7 => flip_horizontal(&rotate270(&img)),
        8 => rotate270(&img),
        _ => img,
    }
}

fn encode_jpeg_mozjpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageIoError> {
    let (width, height) = image.dimensions();

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality.clamp(1, 100) as f32);

    let mut comp = comp
        .start_compress(Vec::new())
        .map_err(|e| ImageIoError::Encode(format!("mozjpeg start_compress failed: {e}")))?;

    comp.write_scanlines(image.as_raw())
        .map_err(|e| ImageIoError::Encode(format!("mozjpeg write_scanlines failed: {e}")))?;

    comp.finish()
        .map_err(|e| ImageIoError::Encode(format!("mozjpeg finish failed: {e}")))
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ImageIoError> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| ImageIoError::Encode(format!("png encode failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_common::OutputFormat;
    use image::Rgb;

    #[test]
    fn round_trips_png_losslessly() {
        let img = RgbImage::from_pixel(40, 30, Rgb([10, 20, 30]));
        let bytes = encode_image(&img, OutputFormat::Png, 100).unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
        assert_eq!(decoded.get_pixel(5, 5), &Rgb([10, 20, 30]));
    }

    #[test]
    fn round_trips_jpeg_within_tolerance() {
        let img = RgbImage::from_pixel(64, 64, Rgb([128, 64, 200]));
        let bytes = encode_image(&img, OutputFormat::Jpeg, 95).unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 64));
        let p = decoded.get_pixel(32, 32);
        for (a, b) in p.0.iter().zip([128u8, 64, 200].iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 8);
        }
    }

    #[test]
    fn flattens_alpha_over_black() {
        let mut rgba = image::RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([255, 255, 255, 128]));
        let flattened = flatten_alpha_over_black(DynamicImage::ImageRgba8(rgba));
        let p = flattened.get_pixel(0, 0);
        assert!(p.0[0] < 255 && p.0[0] > 0);
    }

    #[test]
    fn identity_orientation_is_noop() {
        let img = RgbImage::from_pixel(4, 2, Rgb([1, 2, 3]));
        let out = apply_orientation(img.clone(), 1);
        assert_eq!(out.dimensions(), img.dimensions());
    }

    #[test]
    fn orientation_six_rotates_90() {
        let img = RgbImage::from_pixel(4, 2, Rgb([1, 2, 3]));
        let out = apply_orientation(img, 6);
        assert_eq!(out.dimensions(), (2, 4));
    }
}
