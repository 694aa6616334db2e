//! `lk-tensor` - Matrix buffer model and CPU reference path for linear-kernels.
//!
//! This crate provides:
//! - A 2-D `Matrix` type over row-major host storage, in f32 or f16
//! - Explicit precision conversion (`precision`)
//! - A `ComputeBackend` trait shared by the CPU path and accelerator backends
//! - A reference `CpuBackend` (SIMD dot product, rayon row parallelism)

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod matrix;
pub mod precision;
pub mod shape;
pub mod storage;

// Re-export primary types at the crate root for convenience.
pub use backend::{Activation, ComputeBackend};
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use matrix::Matrix;
pub use shape::Shape;
pub use storage::HostStorage;
