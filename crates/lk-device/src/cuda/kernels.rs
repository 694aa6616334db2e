//! CUDA C sources for the linear-layer kernels.
//!
//! Launch shapes match the emulated kernels in [`crate::kernels`], so the
//! same `launch_config` helpers drive both.

/// Kernels that need no headers: tiled matmul, bias, sigmoid, row softmax.
///
/// - `tiled_matmul`: grid = ceil(N/32) x ceil(M/32), block = 8 x 32,
///   each thread computes four adjacent outputs from float4 loads.
/// - `bias_add`, `sigmoid`: grid = ceil(cols/32) x ceil(rows/8), block = 32 x 8.
/// - `row_softmax`: grid = 1 x rows, block = power of two >= 32,
///   dynamic shared memory = blockDim.x floats.
pub const LINEAR_CUDA: &str = r#"
#define TILE 32
#define VEC 4
#define FULL_MASK 0xffffffffu

__device__ __forceinline__ void load_vec(
    const float* __restrict__ src, int rows, int cols, int r, int c, float* dst)
{
    int offset = r * cols + c;
    if (r < rows && c + VEC <= cols && (offset % VEC) == 0) {
        float4 v = *reinterpret_cast<const float4*>(src + offset);
        dst[0] = v.x; dst[1] = v.y; dst[2] = v.z; dst[3] = v.w;
    } else {
        for (int v = 0; v < VEC; ++v) {
            dst[v] = (r < rows && c + v < cols) ? src[offset + v] : 0.0f;
        }
    }
}

extern "C" __global__ void tiled_matmul(
    const float* __restrict__ A,
    const float* __restrict__ B,
    float* __restrict__ C,
    const int M,
    const int K,
    const int N)
{
    __shared__ __align__(16) float As[TILE][TILE];
    __shared__ __align__(16) float Bs[TILE][TILE];

    int tx = threadIdx.x;
    int ty = threadIdx.y;
    int row = blockIdx.y * TILE + ty;
    int col = blockIdx.x * TILE + tx * VEC;
    float acc[VEC] = {0.0f, 0.0f, 0.0f, 0.0f};

    for (int k0 = 0; k0 < K; k0 += TILE) {
        load_vec(A, M, K, row, k0 + tx * VEC, &As[ty][tx * VEC]);
        load_vec(B, K, N, k0 + ty, col, &Bs[ty][tx * VEC]);
        __syncthreads();

        int depth = min(TILE, K - k0);
        for (int p = 0; p < depth; ++p) {
            float a = As[ty][p];
            for (int v = 0; v < VEC; ++v) {
                acc[v] += a * Bs[p][tx * VEC + v];
            }
        }
        __syncthreads();
    }

    if (row < M) {
        for (int v = 0; v < VEC; ++v) {
            if (col + v < N) {
                C[row * N + col + v] = acc[v];
            }
        }
    }
}

extern "C" __global__ void bias_add(
    float* __restrict__ out,
    const float* __restrict__ bias,
    const int rows,
    const int cols)
{
    int col = blockIdx.x * blockDim.x + threadIdx.x;
    int row = blockIdx.y * blockDim.y + threadIdx.y;
    if (row < rows && col < cols) {
        out[row * cols + col] += bias[col];
    }
}

extern "C" __global__ void sigmoid(float* __restrict__ out, const int rows, const int cols)
{
    int col = blockIdx.x * blockDim.x + threadIdx.x;
    int row = blockIdx.y * blockDim.y + threadIdx.y;
    if (row < rows && col < cols) {
        int idx = row * cols + col;
        out[idx] = 1.0f / (1.0f + __expf(-out[idx]));
    }
}

__device__ float block_reduce(float v, float* shared, bool take_max)
{
    int tid = threadIdx.x;
    shared[tid] = v;
    __syncthreads();
    for (int s = blockDim.x / 2; s >= 32; s >>= 1) {
        if (tid < s) {
            float o = shared[tid + s];
            shared[tid] = take_max ? fmaxf(shared[tid], o) : shared[tid] + o;
        }
        __syncthreads();
    }
    if (tid < 32) {
        float w = shared[tid];
        for (int offset = 16; offset > 0; offset >>= 1) {
            float o = __shfl_xor_sync(FULL_MASK, w, offset);
            w = take_max ? fmaxf(w, o) : w + o;
        }
        if (tid == 0) {
            shared[0] = w;
        }
    }
    __syncthreads();
    float result = shared[0];
    __syncthreads();
    return result;
}

extern "C" __global__ void row_softmax(float* __restrict__ x, const int rows, const int cols)
{
    extern __shared__ float shared[];
    int row_idx = blockIdx.y;
    if (row_idx >= rows) {
        return;
    }
    float* row = x + (size_t)row_idx * cols;
    int tid = threadIdx.x;

    float local = -INFINITY;
    for (int j = tid; j < cols; j += blockDim.x) {
        local = fmaxf(local, row[j]);
    }
    float row_max = block_reduce(local, shared, true);

    if (row_max == -INFINITY) {
        for (int j = tid; j < cols; j += blockDim.x) {
            row[j] = 1.0f / cols;
        }
        return;
    }
    if (row_max == INFINITY) {
        float count = 0.0f;
        for (int j = tid; j < cols; j += blockDim.x) {
            count += isinf(row[j]) && row[j] > 0.0f ? 1.0f : 0.0f;
        }
        float share = 1.0f / block_reduce(count, shared, false);
        for (int j = tid; j < cols; j += blockDim.x) {
            row[j] = (isinf(row[j]) && row[j] > 0.0f) ? share : 0.0f;
        }
        return;
    }

    float sum = 0.0f;
    for (int j = tid; j < cols; j += blockDim.x) {
        float e = __expf(row[j] - row_max);
        row[j] = e;
        sum += e;
    }
    float inv = 1.0f / block_reduce(sum, shared, false);

    for (int j = tid; j < cols; j += blockDim.x) {
        row[j] *= inv;
    }
}
"#;

/// Fused f16 linear + bias + softmax on tensor cores (sm_70+).
///
/// grid = 1 x ceil(M/16), block = 32 * warps, dynamic shared memory =
/// 8 staging tiles of 16x16 halves followed by 16 * N floats. K and N must be
/// multiples of 16.
pub const FUSED_CUDA: &str = r#"
#include <mma.h>
#include <cuda_fp16.h>
using namespace nvcuda;

#define FRAG 16
#define MAX_WARPS 8
#define FULL_MASK 0xffffffffu

extern "C" __global__ void fused_linear_softmax(
    const __half* __restrict__ X,
    const __half* __restrict__ W,
    const __half* __restrict__ bias,
    float* __restrict__ out,
    const int M,
    const int K,
    const int N)
{
    // Staging tiles first, then the FRAG x N logits band.
    extern __shared__ __align__(32) unsigned char smem[];
    __half* a_stage = reinterpret_cast<__half*>(smem);
    float* logits = reinterpret_cast<float*>(smem + MAX_WARPS * FRAG * FRAG * sizeof(__half));

    int warp = threadIdx.x / 32;
    int lane = threadIdx.x % 32;
    int warps = blockDim.x / 32;
    int row0 = blockIdx.y * FRAG;

    for (int tile = warp; tile < N / FRAG; tile += warps) {
        wmma::fragment<wmma::accumulator, FRAG, FRAG, FRAG, float> acc;
        wmma::fill_fragment(acc, 0.0f);

        for (int k0 = 0; k0 < K; k0 += FRAG) {
            // Rows past M are staged as zeros.
            __half* stage = a_stage + warp * FRAG * FRAG;
            for (int i = lane; i < FRAG * FRAG; i += 32) {
                int r = i / FRAG;
                int c = i % FRAG;
                stage[i] = (row0 + r < M) ? X[(size_t)(row0 + r) * K + k0 + c]
                                          : __float2half(0.0f);
            }
            __syncwarp();

            wmma::fragment<wmma::matrix_a, FRAG, FRAG, FRAG, __half, wmma::row_major> a;
            wmma::fragment<wmma::matrix_b, FRAG, FRAG, FRAG, __half, wmma::row_major> b;
            wmma::load_matrix_sync(a, stage, FRAG);
            wmma::load_matrix_sync(b, W + (size_t)k0 * N + tile * FRAG, N);
            wmma::mma_sync(acc, a, b, acc);
            __syncwarp();
        }
        wmma::store_matrix_sync(logits + tile * FRAG, acc, N, wmma::mem_row_major);
    }
    __syncthreads();

    for (int r = warp; r < FRAG && row0 + r < M; r += warps) {
        float* row = logits + r * N;
        float* dst = out + (size_t)(row0 + r) * N;

        float row_max = -INFINITY;
        for (int j = lane; j < N; j += 32) {
            row[j] += __half2float(bias[j]);
            row_max = fmaxf(row_max, row[j]);
        }
        for (int offset = 16; offset > 0; offset >>= 1) {
            row_max = fmaxf(row_max, __shfl_xor_sync(FULL_MASK, row_max, offset));
        }
        if (row_max == -INFINITY) {
            for (int j = lane; j < N; j += 32) {
                dst[j] = 1.0f / N;
            }
            continue;
        }
        if (row_max == INFINITY) {
            float count = 0.0f;
            for (int j = lane; j < N; j += 32) {
                count += (isinf(row[j]) && row[j] > 0.0f) ? 1.0f : 0.0f;
            }
            for (int offset = 16; offset > 0; offset >>= 1) {
                count += __shfl_xor_sync(FULL_MASK, count, offset);
            }
            for (int j = lane; j < N; j += 32) {
                dst[j] = (isinf(row[j]) && row[j] > 0.0f) ? 1.0f / count : 0.0f;
            }
            continue;
        }

        float sum = 0.0f;
        for (int j = lane; j < N; j += 32) {
            float e = __expf(row[j] - row_max);
            row[j] = e;
            sum += e;
        }
        for (int offset = 16; offset > 0; offset >>= 1) {
            sum += __shfl_xor_sync(FULL_MASK, sum, offset);
        }
        float inv = 1.0f / sum;
        for (int j = lane; j < N; j += 32) {
            dst[j] = row[j] * inv;
        }
    }
}
"#;
