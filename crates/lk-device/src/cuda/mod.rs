//! Linear layers on a real NVIDIA device.
//!
//! `CudaLinear` follows the same per-call lifecycle as
//! [`crate::Orchestrator`]: validate on the host, allocate, copy in, launch,
//! synchronize, copy out. Allocations are `CudaSlice`s, freed when they go
//! out of scope.

pub mod kernels;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use cudarc::cublas::sys::cublasOperation_t;
use cudarc::cublas::{CudaBlas, Gemm, GemmConfig};
use cudarc::driver::{CudaContext, CudaFunction, CudaSlice, CudaStream, PushKernelArg};
use cudarc::nvrtc::{compile_ptx_with_opts, CompileError, CompileOptions, Ptx};
use half::f16;
use lk_tensor::{Activation, Matrix, Shape, TensorError};
use tracing::{debug, warn};

use crate::config::{LinearConfig, MatmulStrategy};
use crate::device::DeviceProps;
use crate::error::{DeviceError, LinearError, Result};
use crate::kernels::{BiasAdd, FusedLinearSoftmax, MatmulDims, RowSoftmax, Sigmoid, TiledMatmul};
use crate::launch::LaunchConfig;
use crate::orchestrator::check_operands;

fn vendor<E: Debug>(what: &'static str) -> impl FnOnce(E) -> DeviceError {
    move |err| DeviceError::Vendor(format!("{}: {:?}", what, err))
}

fn to_cuda(cfg: LaunchConfig) -> cudarc::driver::LaunchConfig {
    cudarc::driver::LaunchConfig {
        grid_dim: (cfg.grid_dim.x, cfg.grid_dim.y, cfg.grid_dim.z),
        block_dim: (cfg.block_dim.x, cfg.block_dim.y, cfg.block_dim.z),
        shared_mem_bytes: cfg.shared_mem_bytes,
    }
}

fn dim(value: usize, what: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        TensorError::invalid_dimension("cuda", format!("{} = {} exceeds i32::MAX", what, value))
            .into()
    })
}

fn include_paths() -> Vec<String> {
    let mut paths = BTreeSet::new();
    for key in ["CUDA_PATH", "CUDA_HOME", "CUDA_ROOT"] {
        if let Ok(base) = std::env::var(key) {
            let candidate = PathBuf::from(&base).join("include");
            if candidate.exists() {
                paths.insert(candidate.to_string_lossy().into_owned());
            }
        }
    }
    paths.into_iter().collect()
}

fn compile(source: &str, arch: Option<&'static str>) -> std::result::Result<Ptx, DeviceError> {
    let opts = CompileOptions {
        include_paths: include_paths(),
        arch,
        ..Default::default()
    };
    compile_ptx_with_opts(source, opts).map_err(|err| match err {
        CompileError::CompileError { log, .. } => {
            DeviceError::Vendor(format!("nvrtc compile failed: {}", log.to_string_lossy()))
        }
        other => DeviceError::Vendor(format!("nvrtc compile failed: {:?}", other)),
    })
}

/// Linear layers on one CUDA device.
pub struct CudaLinear {
    _ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    tiled_matmul: CudaFunction,
    bias_add: CudaFunction,
    sigmoid: CudaFunction,
    row_softmax: CudaFunction,
    /// Absent when the tensor-core module fails to build for this device.
    fused: Option<CudaFunction>,
}

impl CudaLinear {
    /// Open device `ordinal` and compile the kernels.
    pub fn new(ordinal: usize) -> std::result::Result<Self, DeviceError> {
        let ctx = CudaContext::new(ordinal).map_err(vendor("cuda context init"))?;
        let stream = ctx.default_stream();

        let module = ctx
            .load_module(compile(kernels::LINEAR_CUDA, None)?)
            .map_err(vendor("load linear module"))?;
        let load = |name: &'static str| module.load_function(name).map_err(vendor(name));
        let tiled_matmul = load(TiledMatmul::NAME)?;
        let bias_add = load(BiasAdd::NAME)?;
        let sigmoid = load(Sigmoid::NAME)?;
        let row_softmax = load(RowSoftmax::NAME)?;

        let fused = match compile(kernels::FUSED_CUDA, Some("compute_70")).and_then(|ptx| {
            ctx.load_module(ptx)
                .map_err(vendor("load fused module"))?
                .load_function(FusedLinearSoftmax::NAME)
                .map_err(vendor(FusedLinearSoftmax::NAME))
        }) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(error = %e, "tensor-core kernel unavailable");
                None
            }
        };
        debug!(ordinal, fused = fused.is_some(), "cuda linear ready");

        Ok(CudaLinear {
            _ctx: ctx,
            stream,
            tiled_matmul,
            bias_add,
            sigmoid,
            row_softmax,
            fused,
        })
    }

    /// The stream every call runs on; a vendor `CudaBlas` must be bound to
    /// it.
    pub fn stream(&self) -> Arc<CudaStream> {
        self.stream.clone()
    }

    /// Create a cuBLAS handle on this device's stream. The caller owns it
    /// and passes it back to [`CudaLinear::linear`].
    pub fn create_blas(&self) -> std::result::Result<CudaBlas, DeviceError> {
        CudaBlas::new(self.stream.clone()).map_err(vendor("cublas handle init"))
    }

    /// `activation(input @ weights + bias)` with the strategy and activation
    /// from `config`.
    pub fn linear(
        &self,
        input: &Matrix,
        weights: &Matrix,
        bias: &[f32],
        config: &LinearConfig,
        blas: Option<&mut CudaBlas>,
    ) -> Result<Matrix> {
        let dims = check_operands("linear", input.shape(), weights.shape())?;
        Shape::new(dims.m, dims.n).check_bias(bias.len())?;
        let (x, w) = (input.as_f32()?, weights.as_f32()?);
        let (m, k, n) = (dim(dims.m, "m")?, dim(dims.k, "k")?, dim(dims.n, "n")?);
        debug!(
            m,
            k,
            n,
            strategy = %config.strategy,
            activation = ?config.activation,
            "cuda linear"
        );

        let stream = &self.stream;
        let x_dev = stream.memcpy_stod(x).map_err(vendor("memcpy_stod(input)"))?;
        let w_dev = stream.memcpy_stod(w).map_err(vendor("memcpy_stod(weights)"))?;
        let b_dev = stream.memcpy_stod(bias).map_err(vendor("memcpy_stod(bias)"))?;
        let mut out = stream
            .alloc_zeros::<f32>(dims.m * dims.n)
            .map_err(vendor("alloc_zeros(output)"))?;

        match config.strategy {
            MatmulStrategy::Tiled => {
                let mut launch = stream.launch_builder(&self.tiled_matmul);
                launch.arg(&x_dev).arg(&w_dev).arg(&mut out).arg(&m).arg(&k).arg(&n);
                let _ = unsafe { launch.launch(to_cuda(TiledMatmul::launch_config(dims))) }
                    .map_err(vendor(TiledMatmul::NAME))?;
            }
            MatmulStrategy::Vendor => {
                let blas = blas.ok_or_else(|| {
                    LinearError::Config("vendor strategy requires a cuBLAS handle".to_string())
                })?;
                sgemm(blas, &x_dev, &w_dev, &mut out, m, k, n)?;
            }
        }

        let (rows, cols) = (dims.m, dims.n);
        {
            let mut launch = stream.launch_builder(&self.bias_add);
            launch.arg(&mut out).arg(&b_dev).arg(&m).arg(&n);
            let _ = unsafe { launch.launch(to_cuda(BiasAdd::launch_config(rows, cols))) }
                .map_err(vendor(BiasAdd::NAME))?;
        }

        match config.activation {
            Activation::Identity => {}
            Activation::Sigmoid => {
                let mut launch = stream.launch_builder(&self.sigmoid);
                launch.arg(&mut out).arg(&m).arg(&n);
                let _ = unsafe { launch.launch(to_cuda(Sigmoid::launch_config(rows, cols))) }
                    .map_err(vendor(Sigmoid::NAME))?;
            }
            Activation::Softmax => {
                let mut launch = stream.launch_builder(&self.row_softmax);
                launch.arg(&mut out).arg(&m).arg(&n);
                let _ = unsafe { launch.launch(to_cuda(RowSoftmax::launch_config(rows, cols))) }
                    .map_err(vendor(RowSoftmax::NAME))?;
            }
        }

        self.finish(&out, dims)
    }

    /// Fused f16 `softmax(input @ weights + bias)` on tensor cores.
    pub fn fused_linear_softmax(
        &self,
        input: &Matrix,
        weights: &Matrix,
        bias: &[f16],
    ) -> Result<Matrix> {
        let dims = check_operands(FusedLinearSoftmax::NAME, input.shape(), weights.shape())?;
        Shape::new(dims.m, dims.n).check_bias(bias.len())?;
        if !FusedLinearSoftmax::is_aligned(dims.k, dims.n) {
            return Err(TensorError::invalid_dimension(
                FusedLinearSoftmax::NAME,
                format!("k={} and n={} must be multiples of 16", dims.k, dims.n),
            )
            .into());
        }
        // Dynamic shared memory above 48 KiB needs a per-function opt-in.
        let limit = DeviceProps::default().shared_mem_per_block;
        if !FusedLinearSoftmax::fits_shared_mem(dims.n, limit) {
            return Err(DeviceError::Unsupported(format!(
                "fused row band of n={} needs {} bytes of shared memory, {} available",
                dims.n,
                FusedLinearSoftmax::shared_mem_bytes(dims.n),
                limit
            ))
            .into());
        }
        let (x, w) = (input.as_f16()?, weights.as_f16()?);
        let func = self.fused.as_ref().ok_or_else(|| {
            DeviceError::Unsupported("f16 matrix-multiply-accumulate".to_string())
        })?;
        let (m, k, n) = (dim(dims.m, "m")?, dim(dims.k, "k")?, dim(dims.n, "n")?);
        debug!(m, k, n, "cuda fused linear softmax");

        let stream = &self.stream;
        let x_dev = stream.memcpy_stod(x).map_err(vendor("memcpy_stod(input)"))?;
        let w_dev = stream.memcpy_stod(w).map_err(vendor("memcpy_stod(weights)"))?;
        let b_dev = stream.memcpy_stod(bias).map_err(vendor("memcpy_stod(bias)"))?;
        let mut out = stream
            .alloc_zeros::<f32>(dims.m * dims.n)
            .map_err(vendor("alloc_zeros(output)"))?;

        {
            let mut launch = stream.launch_builder(func);
            launch
                .arg(&x_dev)
                .arg(&w_dev)
                .arg(&b_dev)
                .arg(&mut out)
                .arg(&m)
                .arg(&k)
                .arg(&n);
            let _ = unsafe { launch.launch(to_cuda(FusedLinearSoftmax::launch_config(dims))) }
                .map_err(vendor(FusedLinearSoftmax::NAME))?;
        }

        self.finish(&out, dims)
    }

    fn finish(&self, out: &CudaSlice<f32>, dims: MatmulDims) -> Result<Matrix> {
        self.stream.synchronize().map_err(vendor("stream synchronize"))?;
        let host = self
            .stream
            .memcpy_dtov(out)
            .map_err(vendor("memcpy_dtov(output)"))?;
        Ok(Matrix::from_vec(host, dims.m, dims.n)?)
    }
}

/// Row-major `c = a @ b` through column-major cuBLAS: computing
/// `c^T = b^T @ a^T` swaps the operands and the m/n extents.
fn sgemm(
    blas: &mut CudaBlas,
    a: &CudaSlice<f32>,
    b: &CudaSlice<f32>,
    c: &mut CudaSlice<f32>,
    m: i32,
    k: i32,
    n: i32,
) -> Result<()> {
    let cfg = GemmConfig {
        transa: cublasOperation_t::CUBLAS_OP_N,
        transb: cublasOperation_t::CUBLAS_OP_N,
        m: n,
        n: m,
        k,
        alpha: 1.0f32,
        lda: n,
        ldb: k,
        beta: 0.0f32,
        ldc: n,
    };
    unsafe { blas.gemm(cfg, b, a, c) }.map_err(vendor("cublas sgemm"))?;
    Ok(())
}
