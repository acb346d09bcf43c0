//! Primary detector tier: a single-shot SSD-style face detector.
//!
//! Expects a 300x300 BGR input with the standard Caffe-SSD mean subtraction
//! `(104, 177, 123)`, no channel swap, no crop, and produces an output tensor
//! shaped `[1, 1, N, 7]` of `(image_id, label, confidence, x1, y1, x2, y2)`
//! with box coordinates normalized to `[0,1]` — the layout this architecture
//! has used since the original Caffe `res10_300x300_ssd` release, preserved
//! by its common ONNX export.

use crate::error::DetectorError;
use cloak_common::BoundingBox;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::sync::Mutex;

const INPUT_SIZE: u32 = 300;
const MEAN: [f32; 3] = [104.0, 177.0, 123.0];

pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

pub struct DnnDetector {
    session: Mutex<Session>,
}

impl DnnDetector {
    pub fn new(session: Session) -> Self {
        DnnDetector {
            session: Mutex::new(session),
        }
    }

    /// Run the detector at `threshold`. Per the spec, callers retry at a
    /// lower threshold (0.3) before giving up and falling back to the
    /// classical tier; this function itself applies whatever threshold it's
    /// given without any retry logic of its own.
    pub fn detect(
        &self,
        image: &RgbImage,
        threshold: f32,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        let (width, height) = image.dimensions();
        let input = preprocess(image);

        let mut session = self
            .session
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {e}")))?;

        let input_value = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        // Standard Caffe-SSD blob name, preserved by this architecture's
        // common ONNX export.
        let (shape, data) = outputs
            .get("detection_out")
            .ok_or_else(|| {
                DetectorError::OutputShape("expected a \"detection_out\" output".into())
            })?
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        postprocess(shape, data, width, height, threshold)
    }
}

fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(
        image,
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
    for (x, y, px) in resized.enumerate_pixels() {
        let [r, g, b] = px.0;
        tensor[[0, 0, y as usize, x as usize]] = b as f32 - MEAN[0];
        tensor[[0, 1, y as usize, x as usize]] = g as f32 - MEAN[1];
        tensor[[0, 2, y as usize, x as usize]] = r as f32 - MEAN[2];
    }
    tensor
}

fn postprocess(
    shape: &[i64],
    data: &[f32],
    width: u32,
    height: u32,
    threshold: f32,
) -> Result<Vec<RawDetection>, DetectorError> {
    let n = *shape
        .last()
        .ok_or_else(|| DetectorError::OutputShape("empty output shape".into()))?;
    if n != 7 {
        return Err(DetectorError::OutputShape(format!(
            "expected last dim 7, got {n}"
        )));
    }

    let mut detections = Vec::new();
    for chunk in data.chunks_exact(7) {
        let confidence = chunk[2];
        if confidence < threshold {
            continue;
        }
        let x1 = (chunk[3].clamp(0.0, 1.0) * width as f32).round() as u32;
        let y1 = (chunk[4].clamp(0.0, 1.0) * height as f32).round() as u32;
        let x2 = (chunk[5].clamp(0.0, 1.0) * width as f32).round() as u32;
        let y2 = (chunk[6].clamp(0.0, 1.0) * height as f32).round() as u32;

        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(RawDetection {
            bbox: BoundingBox { x1, y1, x2, y2 },
            confidence,
        });
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postprocess_filters_below_threshold() {
        // image_id, label, confidence, x1, y1, x2, y2
        let data: Vec<f32> = vec![0.0, 1.0, 0.9, 0.1, 0.1, 0.5, 0.5, 0.0, 1.0, 0.1, 0.1, 0.1, 0.2, 0.2];
        let shape = [1, 1, 2, 7];
        let out = postprocess(&shape, &data, 100, 100, 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox.x1, 10);
        assert_eq!(out[0].bbox.x2, 50);
    }

    #[test]
    fn postprocess_rejects_degenerate_shape() {
        let shape = [1, 1, 1, 6];
        let data = vec![0.0; 6];
        assert!(postprocess(&shape, &data, 10, 10, 0.5).is_err());
    }
}
