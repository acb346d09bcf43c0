use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to build onnx session: {0}")]
    Session(#[from] cloak_core::onnx_utils::OnnxError),

    #[error("onnx inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output shape: {0}")]
    OutputShape(String),
}
