//! Device memory: RAII buffers and the shared handles kernels read through.

use std::fmt;
use std::sync::Arc;

use half::f16;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::Device;

/// Element types that can live in device memory.
pub trait DeviceRepr: Copy + Default + Send + Sync + fmt::Debug + 'static {}

impl DeviceRepr for f32 {}
impl DeviceRepr for f16 {}

/// Identity of one allocation on its device, used to detect aliasing
/// between a kernel's inputs and its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u64);

/// A region of device memory holding one flattened matrix.
///
/// There is no host accessor: data only leaves the device through
/// `Stream::memcpy_dtoh`. Dropping the buffer returns its bytes to the
/// device. The handle is not `Clone`; one owner per allocation.
pub struct DeviceBuffer<T: DeviceRepr> {
    slice: DeviceSlice<T>,
    device: Device,
    bytes: usize,
}

impl<T: DeviceRepr> DeviceBuffer<T> {
    pub(crate) fn new(device: Device, id: BufferId, len: usize, bytes: usize) -> Self {
        DeviceBuffer {
            slice: DeviceSlice {
                id,
                len,
                mem: Arc::new(RwLock::new(vec![T::default(); len])),
            },
            device,
            bytes,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.slice.len
    }

    pub fn is_empty(&self) -> bool {
        self.slice.len == 0
    }

    pub fn id(&self) -> BufferId {
        self.slice.id
    }

    /// Size of the allocation in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.bytes
    }

    /// A handle that queued stream work holds onto.
    pub(crate) fn slice(&self) -> DeviceSlice<T> {
        self.slice.clone()
    }
}

impl<T: DeviceRepr> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.device.release(self.bytes);
    }
}

impl<T: DeviceRepr> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.slice.id)
            .field("len", &self.slice.len)
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Shared view of a buffer's memory, captured by queued stream operations
/// and by kernels.
#[derive(Clone)]
pub struct DeviceSlice<T> {
    id: BufferId,
    len: usize,
    mem: Arc<RwLock<Vec<T>>>,
}

impl<T> DeviceSlice<T> {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.mem.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.mem.write()
    }
}

impl<T> fmt::Debug for DeviceSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSlice")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}
