use lk_tensor::TensorError;
use thiserror::Error;

/// Failures raised by the accelerator runtime: allocation, transfer, launch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    #[error("transfer size mismatch: buffer holds {expected} elements, got {got}")]
    Transfer { expected: usize, got: usize },
    #[error("invalid launch of '{kernel}': {reason}")]
    InvalidLaunch { kernel: &'static str, reason: String },
    #[error("kernel '{kernel}' writes a buffer it also reads")]
    AliasedBuffer { kernel: &'static str },
    #[error("kernel '{kernel}' failed: {reason}")]
    Kernel { kernel: &'static str, reason: String },
    #[error("device does not support {0}")]
    Unsupported(String),
    #[error("stream worker is no longer running")]
    StreamClosed,
    #[error("failed to start stream worker: {0}")]
    Thread(String),
    #[error("vendor routine failed: {0}")]
    Vendor(String),
}

/// Errors surfaced by the orchestration entry points.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinearError {
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl LinearError {
    /// Returns true if the call was rejected for incompatible operand shapes.
    pub fn is_invalid_dimension(&self) -> bool {
        matches!(self, LinearError::Tensor(e) if e.is_invalid_dimension())
    }
}

impl From<LinearError> for TensorError {
    fn from(e: LinearError) -> Self {
        match e {
            LinearError::Tensor(inner) => inner,
            other => TensorError::Other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinearError>;
