//! Accelerator handle, properties and memory accounting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::error::DeviceError;
use crate::memory::{BufferId, DeviceBuffer, DeviceRepr};
use crate::stream::Stream;

/// Static description of an accelerator.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProps {
    /// Human-readable device name.
    pub name: String,
    /// Global memory capacity in bytes.
    pub total_memory: usize,
    /// Shared (on-chip scratch) memory available to one block, in bytes.
    pub shared_mem_per_block: usize,
    /// Upper bound on threads in one block.
    pub max_threads_per_block: u32,
    /// Threads per warp; reductions and fragment ops are warp-wide.
    pub warp_size: u32,
    /// Whether the 16x16x16 f16 matrix-multiply-accumulate unit is present.
    pub tensor_cores: bool,
}

impl Default for DeviceProps {
    fn default() -> Self {
        DeviceProps {
            name: "lk-emulated".to_string(),
            total_memory: 1 << 30,
            shared_mem_per_block: 48 * 1024,
            max_threads_per_block: 1024,
            warp_size: 32,
            tensor_cores: true,
        }
    }
}

#[derive(Debug)]
struct DeviceInner {
    ordinal: usize,
    props: DeviceProps,
    allocated: AtomicUsize,
    allocations: AtomicUsize,
    next_buffer: AtomicU64,
    next_stream: AtomicUsize,
}

/// Handle to one accelerator.
///
/// Cheap to clone; clones refer to the same device and share its memory
/// accounting. Blocks of a kernel launch execute concurrently on the rayon
/// pool, and every `Stream` runs its operations in order on a dedicated
/// worker thread.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Open device `ordinal` with default properties.
    pub fn new(ordinal: usize) -> Self {
        Self::with_props(ordinal, DeviceProps::default())
    }

    /// Open device `ordinal` with the given properties.
    pub fn with_props(ordinal: usize, props: DeviceProps) -> Self {
        Device {
            inner: Arc::new(DeviceInner {
                ordinal,
                props,
                allocated: AtomicUsize::new(0),
                allocations: AtomicUsize::new(0),
                next_buffer: AtomicU64::new(1),
                next_stream: AtomicUsize::new(0),
            }),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.inner.ordinal
    }

    pub fn props(&self) -> &DeviceProps {
        &self.inner.props
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    /// Total number of successful allocations since the device was opened.
    pub fn allocation_count(&self) -> usize {
        self.inner.allocations.load(Ordering::Acquire)
    }

    /// Allocate a zero-filled buffer of `len` elements.
    ///
    /// # Errors
    /// [`DeviceError::OutOfMemory`] if the device cannot hold the allocation.
    pub fn alloc_zeros<T: DeviceRepr>(&self, len: usize) -> Result<DeviceBuffer<T>, DeviceError> {
        let bytes = len * std::mem::size_of::<T>();
        let total = self.inner.props.total_memory;
        self.inner
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&next| next <= total)
            })
            .map_err(|used| DeviceError::OutOfMemory {
                requested: bytes,
                available: total.saturating_sub(used),
            })?;
        self.inner.allocations.fetch_add(1, Ordering::AcqRel);

        let id = BufferId(self.inner.next_buffer.fetch_add(1, Ordering::Relaxed));
        trace!(device = self.inner.ordinal, ?id, len, bytes, "alloc");
        Ok(DeviceBuffer::new(self.clone(), id, len, bytes))
    }

    /// Create a new execution stream on this device.
    pub fn create_stream(&self) -> Result<Stream, DeviceError> {
        let index = self.inner.next_stream.fetch_add(1, Ordering::Relaxed);
        Stream::spawn(self.clone(), index)
    }

    pub(crate) fn release(&self, bytes: usize) {
        self.inner.allocated.fetch_sub(bytes, Ordering::AcqRel);
        trace!(device = self.inner.ordinal, bytes, "free");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_release() {
        let dev = Device::new(0);
        {
            let a = dev.alloc_zeros::<f32>(16).unwrap();
            let b = dev.alloc_zeros::<half::f16>(16).unwrap();
            assert_eq!(a.size_in_bytes(), 64);
            assert_eq!(b.size_in_bytes(), 32);
            assert_ne!(a.id(), b.id());
            assert_eq!(dev.allocated_bytes(), 96);
        }
        assert_eq!(dev.allocated_bytes(), 0);
        assert_eq!(dev.allocation_count(), 2);
    }

    #[test]
    fn test_out_of_memory() {
        let dev = Device::with_props(
            0,
            DeviceProps {
                total_memory: 100,
                ..DeviceProps::default()
            },
        );
        let _a = dev.alloc_zeros::<f32>(20).unwrap();
        let err = dev.alloc_zeros::<f32>(10).unwrap_err();
        assert_eq!(
            err,
            DeviceError::OutOfMemory {
                requested: 40,
                available: 20
            }
        );
        assert_eq!(dev.allocated_bytes(), 80);
    }
}
