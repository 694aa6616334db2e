//! Host orchestration of linear layers on the device.
//!
//! Every call follows the same lifecycle: validate shapes on the host,
//! allocate per-call device buffers, queue host-to-device copies and kernels
//! on a fresh stream, wait on the device-to-host copy of the result, and
//! release everything on return. Validation failures never touch the device.

use half::f16;
use lk_tensor::precision::{narrow_to_f16, to_half};
use lk_tensor::{Activation, ComputeBackend, CpuBackend, Matrix, Shape, TensorError};
use tracing::{debug, warn};

use crate::blas::BlasContext;
use crate::config::{LinearConfig, MatmulStrategy};
use crate::device::Device;
use crate::error::{DeviceError, LinearError, Result};
use crate::kernels::{BiasAdd, FusedLinearSoftmax, MatmulDims, RowSoftmax, Sigmoid};
use crate::memory::DeviceBuffer;
use crate::multiplier::{MatrixMultiplier, TiledMultiplier, VendorMultiplier};
use crate::stream::Stream;

/// Runs linear layers on one device with one configuration.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    device: Device,
    config: LinearConfig,
}

impl Orchestrator {
    pub fn new(device: Device, config: LinearConfig) -> Self {
        Orchestrator { device, config }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// `activation(input @ weights + bias)` with the configured strategy and
    /// activation.
    ///
    /// The vendor strategy needs a caller-owned `blas` context; the tiled
    /// strategy ignores it. Softmax layers go through
    /// [`Orchestrator::linear_softmax`] and so honor `mixed_precision`.
    pub fn linear(
        &self,
        input: &Matrix,
        weights: &Matrix,
        bias: &[f32],
        blas: Option<&mut BlasContext>,
    ) -> Result<Matrix> {
        let activation = self.config.activation;
        if activation == Activation::Softmax {
            return self.linear_softmax(input, weights, bias, blas);
        }
        self.with_multiplier(blas, |mm| {
            self.linear_with(input, weights, bias, activation, mm)
        })
    }

    /// [`Orchestrator::linear`] over nested row-major data.
    pub fn linear_rows(
        &self,
        input: &[Vec<f32>],
        weights: &[Vec<f32>],
        bias: &[f32],
        blas: Option<&mut BlasContext>,
    ) -> Result<Vec<Vec<f32>>> {
        let input = Matrix::from_rows(input)?;
        let weights = Matrix::from_rows(weights)?;
        Ok(self.linear(&input, &weights, bias, blas)?.to_rows()?)
    }

    /// `activation(input @ weights + bias)` with an explicit multiplier.
    pub fn linear_with(
        &self,
        input: &Matrix,
        weights: &Matrix,
        bias: &[f32],
        activation: Activation,
        mm: &mut dyn MatrixMultiplier,
    ) -> Result<Matrix> {
        let dims = check_operands("linear", input.shape(), weights.shape())?;
        Shape::new(dims.m, dims.n).check_bias(bias.len())?;
        let (x, w) = (input.as_f32()?, weights.as_f32()?);
        let out = self.run_linear(x, w, Some(bias), dims, activation, mm)?;
        Ok(Matrix::from_vec(out, dims.m, dims.n)?)
    }

    /// `a @ b` with the tiled kernel.
    pub fn matmul(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        let dims = check_operands("matmul", a.shape(), b.shape())?;
        let out = self.run_linear(
            a.as_f32()?,
            b.as_f32()?,
            None,
            dims,
            Activation::Identity,
            &mut TiledMultiplier,
        )?;
        Ok(Matrix::from_vec(out, dims.m, dims.n)?)
    }

    /// Row-wise softmax of `x`.
    pub fn softmax(&self, x: &Matrix) -> Result<Matrix> {
        let (rows, cols) = (x.rows(), x.cols());
        if rows == 0 || cols == 0 {
            return Err(empty_operand("softmax", x.shape()).into());
        }
        let out = self.run_elementwise(x.as_f32()?, rows, cols, Activation::Softmax)?;
        Ok(Matrix::from_vec(out, rows, cols)?)
    }

    /// `softmax(input @ weights + bias)` in one kernel on reduced-precision
    /// operands, accumulating in f32.
    ///
    /// K and N must be multiples of 16. Requires tensor-core support and a
    /// row band that fits in shared memory
    /// ([`FusedLinearSoftmax::shared_mem_bytes`]; N <= 704 on the default
    /// 48 KiB device), checked before anything is allocated.
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
        let (x, w) = (input.as_f16()?, weights.as_f16()?);
        let props = self.device.props();
        if !props.tensor_cores {
            return Err(
                DeviceError::Unsupported("f16 matrix-multiply-accumulate".to_string()).into(),
            );
        }
        if !FusedLinearSoftmax::fits_shared_mem(dims.n, props.shared_mem_per_block) {
            return Err(DeviceError::Unsupported(format!(
                "fused row band of n={} needs {} bytes of shared memory, {} available",
                dims.n,
                FusedLinearSoftmax::shared_mem_bytes(dims.n),
                props.shared_mem_per_block
            ))
            .into());
        }
        debug!(m = dims.m, k = dims.k, n = dims.n, "fused linear softmax");

        let dx = self.device.alloc_zeros::<f16>(x.len())?;
        let dw = self.device.alloc_zeros::<f16>(w.len())?;
        let db = self.device.alloc_zeros::<f16>(bias.len())?;
        let dout = self.device.alloc_zeros::<f32>(dims.m * dims.n)?;
        let stream = self.device.create_stream()?;

        stream.memcpy_htod(x, &dx)?;
        stream.memcpy_htod(w, &dw)?;
        stream.memcpy_htod(bias, &db)?;
        let kernel = FusedLinearSoftmax::new(&dx, &dw, &db, dims)?;
        stream.launch(kernel, FusedLinearSoftmax::launch_config(dims), &dout)?;
        let out = stream.memcpy_dtoh(&dout).wait()?;
        Ok(Matrix::from_vec(out, dims.m, dims.n)?)
    }

    /// `softmax(input @ weights + bias)` on f32 operands.
    ///
    /// Takes the fused f16 kernel when mixed precision is enabled and the
    /// device, shapes and operand range allow it; otherwise runs matmul, bias
    /// and softmax as separate kernels with the configured strategy.
    pub fn linear_softmax(
        &self,
        input: &Matrix,
        weights: &Matrix,
        bias: &[f32],
        blas: Option<&mut BlasContext>,
    ) -> Result<Matrix> {
        let dims = check_operands("linear_softmax", input.shape(), weights.shape())?;
        Shape::new(dims.m, dims.n).check_bias(bias.len())?;

        let reason = match self.fused_blocker(dims) {
            None => match half_operands(input, weights, bias) {
                Ok((x, w, b)) => return self.fused_linear_softmax(&x, &w, &b),
                Err(TensorError::PrecisionOverflow { .. }) => "operand outside the f16 range",
                Err(e) => return Err(e.into()),
            },
            Some(reason) => reason,
        };
        if self.config.mixed_precision {
            warn!(
                m = dims.m,
                k = dims.k,
                n = dims.n,
                reason,
                "fused kernel unavailable, using separate kernels"
            );
        }
        self.with_multiplier(blas, |mm| {
            self.linear_with(input, weights, bias, Activation::Softmax, mm)
        })
    }

    /// Why the fused kernel cannot serve `dims`, if it cannot.
    fn fused_blocker(&self, dims: MatmulDims) -> Option<&'static str> {
        let props = self.device.props();
        if !self.config.mixed_precision {
            Some("mixed precision disabled")
        } else if !props.tensor_cores {
            Some("no tensor cores")
        } else if !FusedLinearSoftmax::is_aligned(dims.k, dims.n) {
            Some("k or n not a multiple of 16")
        } else if !FusedLinearSoftmax::fits_shared_mem(dims.n, props.shared_mem_per_block) {
            Some("output row band exceeds shared memory")
        } else {
            None
        }
    }

    fn with_multiplier<R>(
        &self,
        blas: Option<&mut BlasContext>,
        f: impl FnOnce(&mut dyn MatrixMultiplier) -> Result<R>,
    ) -> Result<R> {
        match self.config.strategy {
            MatmulStrategy::Tiled => f(&mut TiledMultiplier),
            MatmulStrategy::Vendor => {
                let ctx = blas.ok_or_else(|| {
                    LinearError::Config("vendor strategy requires a BLAS context".to_string())
                })?;
                f(&mut VendorMultiplier::new(ctx))
            }
        }
    }

    /// Device pipeline for validated operands.
    fn run_linear(
        &self,
        x: &[f32],
        w: &[f32],
        bias: Option<&[f32]>,
        dims: MatmulDims,
        activation: Activation,
        mm: &mut dyn MatrixMultiplier,
    ) -> std::result::Result<Vec<f32>, DeviceError> {
        let MatmulDims { m, k, n } = dims;
        debug!(m, k, n, strategy = mm.name(), ?activation, "linear");

        let dx = self.device.alloc_zeros::<f32>(x.len())?;
        let dw = self.device.alloc_zeros::<f32>(w.len())?;
        let db = match bias {
            Some(b) => Some(self.device.alloc_zeros::<f32>(b.len())?),
            None => None,
        };
        let dout = self.device.alloc_zeros::<f32>(m * n)?;
        // Declared after the buffers so it drains before they are released.
        let stream = self.device.create_stream()?;

        stream.memcpy_htod(x, &dx)?;
        stream.memcpy_htod(w, &dw)?;
        mm.matmul(&stream, &dx, &dw, &dout, dims)?;
        if let (Some(b), Some(db)) = (bias, db.as_ref()) {
            stream.memcpy_htod(b, db)?;
            stream.launch(BiasAdd::new(db, m, n)?, BiasAdd::launch_config(m, n), &dout)?;
        }
        activate(&stream, &dout, m, n, activation)?;
        stream.memcpy_dtoh(&dout).wait()
    }

    /// Upload `x`, apply one in-place kernel, download.
    fn run_elementwise(
        &self,
        x: &[f32],
        rows: usize,
        cols: usize,
        activation: Activation,
    ) -> std::result::Result<Vec<f32>, DeviceError> {
        debug!(rows, cols, ?activation, "elementwise");
        let buf = self.device.alloc_zeros::<f32>(x.len())?;
        let stream = self.device.create_stream()?;
        stream.memcpy_htod(x, &buf)?;
        activate(&stream, &buf, rows, cols, activation)?;
        stream.memcpy_dtoh(&buf).wait()
    }
}

/// Narrow the operands of the fused path.
fn half_operands(
    input: &Matrix,
    weights: &Matrix,
    bias: &[f32],
) -> std::result::Result<(Matrix, Matrix, Vec<f16>), TensorError> {
    Ok((to_half(input)?, to_half(weights)?, narrow_to_f16(bias)?))
}

fn activate(
    stream: &Stream,
    out: &DeviceBuffer<f32>,
    rows: usize,
    cols: usize,
    activation: Activation,
) -> std::result::Result<(), DeviceError> {
    match activation {
        Activation::Identity => Ok(()),
        Activation::Sigmoid => stream.launch(
            Sigmoid::new(rows, cols),
            Sigmoid::launch_config(rows, cols),
            out,
        ),
        Activation::Softmax => stream.launch(
            RowSoftmax::new(rows, cols),
            RowSoftmax::launch_config(rows, cols),
            out,
        ),
    }
}

/// Validate `lhs @ rhs` and reject empty operands.
pub(crate) fn check_operands(
    op: &'static str,
    lhs: Shape,
    rhs: Shape,
) -> std::result::Result<MatmulDims, TensorError> {
    let out = lhs.matmul_output(&rhs)?;
    if lhs.numel() == 0 || rhs.numel() == 0 {
        return Err(empty_operand(op, if lhs.numel() == 0 { lhs } else { rhs }));
    }
    Ok(MatmulDims::new(out.rows(), lhs.cols(), out.cols()))
}

fn empty_operand(op: &'static str, shape: Shape) -> TensorError {
    TensorError::invalid_dimension(op, format!("empty operand {}", shape))
}

/// The device as a drop-in [`ComputeBackend`].
///
/// Matrix products always use the tiled kernel here; the vendor strategy
/// needs a context that the trait has no room for. Transpose is a pure data
/// movement and stays on the host.
impl ComputeBackend for Orchestrator {
    fn name(&self) -> &str {
        "device"
    }

    fn matmul(
        &self,
        a: &[f32],
        b: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> lk_tensor::Result<Vec<f32>> {
        let lhs = Shape::new(m, k);
        let rhs = Shape::new(k, n);
        lhs.check_len("matmul lhs", a.len())?;
        rhs.check_len("matmul rhs", b.len())?;
        let dims = check_operands("matmul", lhs, rhs)?;
        let out = self
            .run_linear(a, b, None, dims, Activation::Identity, &mut TiledMultiplier)
            .map_err(LinearError::from)?;
        Ok(out)
    }

    fn transpose(&self, a: &[f32], rows: usize, cols: usize) -> lk_tensor::Result<Vec<f32>> {
        CpuBackend::new().transpose(a, rows, cols)
    }

    fn add_bias(
        &self,
        x: &[f32],
        bias: &[f32],
        rows: usize,
        cols: usize,
    ) -> lk_tensor::Result<Vec<f32>> {
        let shape = Shape::new(rows, cols);
        shape.check_len("add_bias", x.len())?;
        shape.check_bias(bias.len())?;
        if x.is_empty() {
            return Ok(Vec::new());
        }
        let run = || -> std::result::Result<Vec<f32>, DeviceError> {
            let buf = self.device.alloc_zeros::<f32>(x.len())?;
            let db = self.device.alloc_zeros::<f32>(bias.len())?;
            let stream = self.device.create_stream()?;
            stream.memcpy_htod(x, &buf)?;
            stream.memcpy_htod(bias, &db)?;
            stream.launch(
                BiasAdd::new(&db, rows, cols)?,
                BiasAdd::launch_config(rows, cols),
                &buf,
            )?;
            stream.memcpy_dtoh(&buf).wait()
        };
        Ok(run().map_err(LinearError::from)?)
    }

    fn softmax(&self, x: &[f32], cols: usize) -> lk_tensor::Result<Vec<f32>> {
        if cols == 0 || x.len() % cols != 0 {
            return Err(TensorError::invalid_dimension(
                "softmax",
                format!("x.len()={} is not a multiple of cols={}", x.len(), cols),
            ));
        }
        if x.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .run_elementwise(x, x.len() / cols, cols, Activation::Softmax)
            .map_err(LinearError::from)?)
    }

    fn sigmoid(&self, x: &[f32]) -> lk_tensor::Result<Vec<f32>> {
        if x.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .run_elementwise(x, 1, x.len(), Activation::Sigmoid)
            .map_err(LinearError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProps;
    use approx::assert_relative_eq;
    use lk_tensor::DType;

    fn orchestrator(config: LinearConfig) -> Orchestrator {
        Orchestrator::new(Device::new(0), config)
    }

    fn m(rows: &[&[f32]]) -> Matrix {
        Matrix::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_linear_identity() {
        let orch = orchestrator(LinearConfig::default());
        let out = orch
            .linear(
                &m(&[&[1.0, 2.0], &[3.0, 4.0]]),
                &m(&[&[5.0, 6.0], &[7.0, 8.0]]),
                &[1.0, -1.0],
                None,
            )
            .unwrap();
        assert_eq!(out.as_f32().unwrap(), &[20.0, 21.0, 44.0, 49.0]);
        assert_eq!(orch.device().allocated_bytes(), 0);
    }

    #[test]
    fn test_linear_sigmoid_matches_cpu() {
        let orch = orchestrator(LinearConfig::default().with_activation(Activation::Sigmoid));
        let x = m(&[&[0.5, -1.0, 2.0], &[0.0, 0.25, -0.75]]);
        let w = m(&[&[0.1, 0.2], &[-0.3, 0.4], &[0.5, -0.6]]);
        let bias = [0.05, -0.05];
        let got = orch.linear(&x, &w, &bias, None).unwrap();
        let want = CpuBackend::new()
            .linear(
                x.as_f32().unwrap(),
                w.as_f32().unwrap(),
                &bias,
                (2, 3, 2),
                Activation::Sigmoid,
            )
            .unwrap();
        for (g, r) in got.as_f32().unwrap().iter().zip(&want) {
            assert_relative_eq!(*g, *r, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_vendor_without_context_is_config_error() {
        let orch = orchestrator(LinearConfig::default().with_strategy(MatmulStrategy::Vendor));
        let err = orch
            .linear(&m(&[&[1.0]]), &m(&[&[2.0]]), &[0.0], None)
            .unwrap_err();
        assert!(matches!(err, LinearError::Config(_)));
    }

    #[test]
    fn test_bias_mismatch_before_device_work() {
        let orch = orchestrator(LinearConfig::default());
        let err = orch
            .linear(&m(&[&[1.0, 2.0]]), &m(&[&[1.0], &[2.0]]), &[0.0, 0.0], None)
            .unwrap_err();
        assert!(err.is_invalid_dimension());
        assert_eq!(orch.device().allocation_count(), 0);
    }

    #[test]
    fn test_empty_operand_rejected() {
        let orch = orchestrator(LinearConfig::default());
        let empty = Matrix::zeros(0, 2, DType::F32);
        let err = orch.matmul(&empty, &m(&[&[1.0], &[2.0]])).unwrap_err();
        assert!(err.is_invalid_dimension());
    }

    #[test]
    fn test_f16_input_rejected_by_generic_path() {
        let orch = orchestrator(LinearConfig::default());
        let half = m(&[&[1.0]]).to_f16().unwrap();
        let err = orch.linear(&half, &m(&[&[1.0]]), &[0.0], None).unwrap_err();
        assert!(matches!(err, LinearError::Tensor(TensorError::DTypeMismatch { .. })));
    }

    #[test]
    fn test_fused_requires_alignment_and_tensor_cores() {
        let orch = orchestrator(LinearConfig::default());
        let x = Matrix::zeros(2, 10, DType::F16);
        let w = Matrix::zeros(10, 16, DType::F16);
        let bias = vec![f16::ZERO; 16];
        assert!(orch
            .fused_linear_softmax(&x, &w, &bias)
            .unwrap_err()
            .is_invalid_dimension());

        let plain = Orchestrator::new(
            Device::with_props(
                0,
                DeviceProps {
                    tensor_cores: false,
                    ..DeviceProps::default()
                },
            ),
            LinearConfig::default(),
        );
        let x = Matrix::zeros(2, 16, DType::F16);
        let err = plain.fused_linear_softmax(&x, &w_16(), &bias).unwrap_err();
        assert!(matches!(err, LinearError::Device(DeviceError::Unsupported(_))));
    }

    fn w_16() -> Matrix {
        Matrix::zeros(16, 16, DType::F16)
    }

    #[test]
    fn test_fused_uniform_for_zero_operands() {
        let orch = orchestrator(LinearConfig::default());
        let out = orch
            .fused_linear_softmax(
                &Matrix::zeros(3, 16, DType::F16),
                &w_16(),
                &vec![f16::ZERO; 16],
            )
            .unwrap();
        for v in out.as_f32().unwrap() {
            assert_relative_eq!(*v, 1.0 / 16.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_linear_softmax_routes_both_ways() {
        let (rows, k, n) = (5, 16, 32);
        let x: Vec<f32> = (0..rows * k).map(|i| (i % 9) as f32 * 0.1 - 0.4).collect();
        let w: Vec<f32> = (0..k * n).map(|i| (i % 11) as f32 * 0.05 - 0.25).collect();
        let bias: Vec<f32> = (0..n).map(|j| j as f32 * 0.01).collect();
        let x = Matrix::from_vec(x, rows, k).unwrap();
        let w = Matrix::from_vec(w, k, n).unwrap();

        let exact = orchestrator(LinearConfig::default())
            .linear_softmax(&x, &w, &bias, None)
            .unwrap();
        let mixed = orchestrator(LinearConfig::default().with_mixed_precision(true))
            .linear_softmax(&x, &w, &bias, None)
            .unwrap();
        let tol = DType::F16.tolerance();
        for (a, b) in mixed.as_f32().unwrap().iter().zip(exact.as_f32().unwrap()) {
            assert!((a - b).abs() <= tol * b.abs().max(1.0 / n as f32));
        }
    }

    #[test]
    fn test_linear_softmax_falls_back_when_unaligned() {
        let orch = orchestrator(LinearConfig::default().with_mixed_precision(true));
        let eye = m(&[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0]]);
        let out = orch
            .linear_softmax(&m(&[&[1.0, 2.0, 3.0]]), &eye, &[0.0; 3], None)
            .unwrap();
        let p = out.as_f32().unwrap();
        assert_relative_eq!(p[0], 0.0900, epsilon = 1e-4);
        assert_relative_eq!(p[1], 0.2447, epsilon = 1e-4);
        assert_relative_eq!(p[2], 0.6652, epsilon = 1e-4);
    }

    #[test]
    fn test_fused_band_too_wide_allocates_nothing() {
        let orch = orchestrator(LinearConfig::default());
        let err = orch
            .fused_linear_softmax(
                &Matrix::zeros(2, 16, DType::F16),
                &Matrix::zeros(16, 1024, DType::F16),
                &vec![f16::ZERO; 1024],
            )
            .unwrap_err();
        assert!(matches!(err, LinearError::Device(DeviceError::Unsupported(_))));
        assert_eq!(orch.device().allocation_count(), 0);
    }

    #[test]
    fn test_linear_softmax_falls_back_on_f16_overflow() {
        let x = Matrix::from_vec(vec![1.0e5; 2 * 16], 2, 16).unwrap();
        let w = Matrix::from_vec(
            (0..16 * 16).map(|i| (i % 7) as f32 * 1.0e-6).collect(),
            16,
            16,
        )
        .unwrap();
        let bias = vec![0.0; 16];

        let mixed = orchestrator(LinearConfig::default().with_mixed_precision(true))
            .linear_softmax(&x, &w, &bias, None)
            .unwrap();
        let exact = orchestrator(LinearConfig::default())
            .linear_softmax(&x, &w, &bias, None)
            .unwrap();
        assert_eq!(mixed, exact);
        for row in mixed.to_rows().unwrap() {
            assert_relative_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_softmax_linear_honors_mixed_precision() {
        let config = LinearConfig::default()
            .with_activation(Activation::Softmax)
            .with_mixed_precision(true);
        let orch = orchestrator(config);
        let x: Vec<f32> = (0..3 * 16).map(|i| (i % 5) as f32 * 0.2 - 0.4).collect();
        let w: Vec<f32> = (0..16 * 16).map(|i| (i % 13) as f32 * 0.03 - 0.2).collect();
        let x = Matrix::from_vec(x, 3, 16).unwrap();
        let w = Matrix::from_vec(w, 16, 16).unwrap();
        let bias = vec![0.1; 16];

        let routed = orch.linear(&x, &w, &bias, None).unwrap();
        let fused = orch
            .fused_linear_softmax(
                &x.to_f16().unwrap(),
                &w.to_f16().unwrap(),
                &narrow_to_f16(&bias).unwrap(),
            )
            .unwrap();
        assert_eq!(routed, fused);
    }

    #[test]
    fn test_backend_trait_matches_cpu() {
        let orch = orchestrator(LinearConfig::default());
        let dev: &dyn ComputeBackend = &orch;
        let cpu = CpuBackend::new();
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [0.5, -1.0, 1.5, 2.0, -0.5, 0.25];
        assert_eq!(
            dev.matmul(&a, &b, 2, 3, 2).unwrap(),
            cpu.matmul(&a, &b, 2, 3, 2).unwrap()
        );
        assert_eq!(dev.transpose(&a, 2, 3).unwrap(), cpu.transpose(&a, 2, 3).unwrap());
        assert_eq!(
            dev.add_bias(&a, &[1.0, 2.0, 3.0], 2, 3).unwrap(),
            cpu.add_bias(&a, &[1.0, 2.0, 3.0], 2, 3).unwrap()
        );
        for (g, r) in dev.softmax(&a, 3).unwrap().iter().zip(cpu.softmax(&a, 3).unwrap()) {
            assert_relative_eq!(*g, r, epsilon = 1e-6);
        }
        for (g, r) in dev.sigmoid(&a).unwrap().iter().zip(cpu.sigmoid(&a).unwrap()) {
            assert_relative_eq!(*g, r, epsilon = 1e-6);
        }
        assert!(dev.matmul(&a, &b, 3, 3, 2).is_err());
    }

    #[test]
    fn test_matrix_matmul_through_device() {
        let orch = orchestrator(LinearConfig::default());
        let a = m(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let b = m(&[&[5.0, 6.0], &[7.0, 8.0]]);
        let c = a.matmul(&b, &orch).unwrap();
        assert_eq!(c.to_rows().unwrap(), vec![vec![19.0, 22.0], vec![43.0, 50.0]]);
    }
}
