use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the face restoration batch tool.
///
/// Each variant carries the context of its domain (filesystem, image
/// processing, model inference) so callers never need to parse error strings.
#[derive(Error, Debug)]
pub enum FaceRestoreError {
    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Cropped and restored faces must share a height to be placed side by side.
    #[error(
        "Dimension mismatch: cropped face is {}x{}, restored face is {}x{}",
        cropped.0, cropped.1, restored.0, restored.1
    )]
    DimensionMismatch {
        cropped: (u32, u32),
        restored: (u32, u32),
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FaceRestoreError>;

/// Convert I/O errors to filesystem errors.
///
/// Call sites that know the path and operation should build
/// `FaceRestoreError::FileSystem` directly; this is the fallback.
impl From<std::io::Error> for FaceRestoreError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for FaceRestoreError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for FaceRestoreError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: err.to_string().into(),
        }
    }
}

/// Shape errors come out of tensor reshaping during inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for FaceRestoreError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
