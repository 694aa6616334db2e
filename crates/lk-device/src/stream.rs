//! In-order, host-asynchronous execution streams.
//!
//! Every stream owns a worker thread that drains a queue of operations in
//! issue order. Enqueueing returns immediately; the host only observes
//! completion through [`Stream::synchronize`] or [`PendingCopy::wait`].
//! The first failing operation poisons the stream: later operations are
//! skipped and every subsequent wait reports that error.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::JoinHandle;

use tracing::{trace, warn};

use crate::device::Device;
use crate::error::DeviceError;
use crate::launch::{Kernel, LaunchConfig};
use crate::memory::{DeviceBuffer, DeviceRepr};

type Op = Box<dyn FnOnce(Option<&DeviceError>) -> Result<(), DeviceError> + Send>;

enum Command {
    Run { name: &'static str, op: Op },
    Fence(SyncSender<Result<(), DeviceError>>),
}

/// An ordered queue of device operations.
pub struct Stream {
    device: Device,
    index: usize,
    queue: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub(crate) fn spawn(device: Device, index: usize) -> Result<Stream, DeviceError> {
        let (tx, rx) = mpsc::channel::<Command>();
        let worker = std::thread::Builder::new()
            .name(format!("lk-stream-{}-{}", device.ordinal(), index))
            .spawn(move || drain(rx))
            .map_err(|e| DeviceError::Thread(e.to_string()))?;
        Ok(Stream {
            device,
            index,
            queue: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Queue an operation that is skipped once the stream is poisoned.
    pub(crate) fn enqueue<F>(&self, name: &'static str, f: F) -> Result<(), DeviceError>
    where
        F: FnOnce() -> Result<(), DeviceError> + Send + 'static,
    {
        self.submit(
            name,
            Box::new(move |poisoned| match poisoned {
                Some(_) => Ok(()),
                None => f(),
            }),
        )
    }

    fn submit(&self, name: &'static str, op: Op) -> Result<(), DeviceError> {
        let queue = self.queue.as_ref().ok_or(DeviceError::StreamClosed)?;
        queue
            .send(Command::Run { name, op })
            .map_err(|_| DeviceError::StreamClosed)
    }

    /// Asynchronous host-to-device copy of `src` into `dst`.
    ///
    /// `src` is staged before this returns, so the caller may reuse it
    /// immediately.
    pub fn memcpy_htod<T: DeviceRepr>(
        &self,
        src: &[T],
        dst: &DeviceBuffer<T>,
    ) -> Result<(), DeviceError> {
        if src.len() != dst.len() {
            return Err(DeviceError::Transfer {
                expected: dst.len(),
                got: src.len(),
            });
        }
        let staged = src.to_vec();
        let target = dst.slice();
        self.enqueue("memcpy_htod", move || {
            trace!(buffer = ?target.id(), len = staged.len(), "htod");
            target.write().copy_from_slice(&staged);
            Ok(())
        })
    }

    /// Asynchronous device-to-host copy of `src`.
    ///
    /// The data is only reachable through [`PendingCopy::wait`], which
    /// blocks until every operation issued before the copy has finished.
    pub fn memcpy_dtoh<T: DeviceRepr>(&self, src: &DeviceBuffer<T>) -> PendingCopy<T> {
        let (tx, rx) = mpsc::sync_channel(1);
        let source = src.slice();
        let submitted = self.submit(
            "memcpy_dtoh",
            Box::new(move |poisoned| {
                let result = match poisoned {
                    Some(e) => Err(e.clone()),
                    None => {
                        trace!(buffer = ?source.id(), len = source.len(), "dtoh");
                        Ok(source.read().clone())
                    }
                };
                let _ = tx.send(result);
                Ok(())
            }),
        );
        PendingCopy {
            rx,
            submit_error: submitted.err(),
        }
    }

    /// Launch `kernel` over `cfg`, writing into `out`.
    ///
    /// The launch configuration is validated against the device limits
    /// before anything is queued, so malformed launches fail here rather
    /// than on the worker.
    pub fn launch<K: Kernel>(
        &self,
        kernel: K,
        cfg: LaunchConfig,
        out: &DeviceBuffer<f32>,
    ) -> Result<(), DeviceError> {
        cfg.validate(kernel.name(), self.device.props())?;
        if kernel.reads().contains(&out.id()) {
            return Err(DeviceError::AliasedBuffer {
                kernel: kernel.name(),
            });
        }
        let target = out.slice();
        let name = kernel.name();
        self.enqueue(name, move || {
            trace!(kernel = name, grid = ?cfg.grid_dim, block = ?cfg.block_dim, "launch");
            let mut mem = target.write();
            kernel.execute(&cfg, &mut mem)
        })
    }

    /// Block until every operation issued so far has completed.
    pub fn synchronize(&self) -> Result<(), DeviceError> {
        let queue = self.queue.as_ref().ok_or(DeviceError::StreamClosed)?;
        let (tx, rx) = mpsc::sync_channel(1);
        queue
            .send(Command::Fence(tx))
            .map_err(|_| DeviceError::StreamClosed)?;
        rx.recv().map_err(|_| DeviceError::StreamClosed)?
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn drain(rx: Receiver<Command>) {
    let mut poisoned: Option<DeviceError> = None;
    for command in rx {
        match command {
            Command::Run { name, op } => {
                if let Err(e) = op(poisoned.as_ref()) {
                    warn!(op = name, error = %e, "stream operation failed");
                    poisoned.get_or_insert(e);
                }
            }
            Command::Fence(reply) => {
                let status = match &poisoned {
                    Some(e) => Err(e.clone()),
                    None => Ok(()),
                };
                let _ = reply.send(status);
            }
        }
    }
}

/// The result of a device-to-host copy that has been issued but not yet
/// waited on.
#[must_use = "device results are only available after `wait`"]
pub struct PendingCopy<T> {
    rx: Receiver<Result<Vec<T>, DeviceError>>,
    submit_error: Option<DeviceError>,
}

impl<T> PendingCopy<T> {
    /// Block until the copy (and everything queued before it) has finished.
    pub fn wait(self) -> Result<Vec<T>, DeviceError> {
        if let Some(e) = self.submit_error {
            return Err(e);
        }
        self.rx.recv().map_err(|_| DeviceError::StreamClosed)?
    }
}
