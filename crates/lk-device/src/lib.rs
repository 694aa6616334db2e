//! `lk-device` - Accelerator runtime, kernels and host orchestration.
//!
//! This crate provides:
//! - An emulated SIMT accelerator: `Device`, RAII `DeviceBuffer`s and
//!   in-order asynchronous `Stream`s whose results are only reachable through
//!   `PendingCopy::wait`
//! - Kernels: shared-memory tiled matmul, bias fusion, sigmoid, row softmax
//!   and the fused f16 linear+softmax kernel built on 16x16x16 fragments
//! - A `MatrixMultiplier` seam with a tiled-kernel and a vendor-BLAS strategy
//! - The `Orchestrator`, which runs whole linear layers and implements
//!   `lk_tensor::ComputeBackend`
//!
//! # Feature Flags
//!
//! - `cuda`: CUDA kernels and a `CudaLinear` orchestrator over `cudarc`

pub mod blas;
pub mod config;
pub mod device;
pub mod error;
pub mod kernels;
pub mod launch;
pub mod memory;
pub mod multiplier;
pub mod orchestrator;
pub mod stream;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use blas::BlasContext;
pub use config::{LinearConfig, MatmulStrategy};
pub use device::{Device, DeviceProps};
pub use error::{DeviceError, LinearError, Result};
pub use kernels::MatmulDims;
pub use launch::{Dim3, Kernel, LaunchConfig};
pub use memory::{BufferId, DeviceBuffer, DeviceRepr};
pub use multiplier::{MatrixMultiplier, TiledMultiplier, VendorMultiplier};
pub use orchestrator::Orchestrator;
pub use stream::{PendingCopy, Stream};
