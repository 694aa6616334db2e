use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("invalid dimension in {op}: {detail}")]
    InvalidDimension { op: &'static str, detail: String },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },
    #[error("precision overflow: element {index} ({value}) is outside the f16 range")]
    PrecisionOverflow { index: usize, value: f32 },
    #[error("{0}")]
    Other(String),
}

impl TensorError {
    /// Shorthand for building an [`TensorError::InvalidDimension`].
    pub fn invalid_dimension(op: &'static str, detail: impl Into<String>) -> Self {
        TensorError::InvalidDimension {
            op,
            detail: detail.into(),
        }
    }

    /// Returns true if this error reports incompatible operand shapes.
    pub fn is_invalid_dimension(&self) -> bool {
        matches!(self, TensorError::InvalidDimension { .. })
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;
