//! The kernel thread: one command buffer accumulating compute passes, plus the shared
//! completion signal downstream future tensors wait on. A thread stops accepting new tasks
//! once it is *committed* (submitted) or has reached its *capacity* (task count); at that
//! point `ThreadPool::push` rotates to a fresh thread, chaining the new one's first dispatch
//! after the old one's submission via the queue's own FIFO ordering (the single cooperative
//! queue means no explicit event wait is needed between partitions; submission order already
//! serializes them).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use ferrite_gpu::{Device, Encoder};

use crate::cache::KernelCache;
use crate::task::KernelTask;
use crate::{Error, Result};

/// A cheaply cloned handle to a kernel thread's completion. `wait` blocks the calling thread
/// until every task submitted as part of the owning kernel thread has finished executing on
/// the device; repeated calls after the first resolution return immediately.
#[derive(Clone)]
pub struct ThreadSignal {
    ready: Arc<AtomicBool>,
}

impl ThreadSignal {
    fn pending() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A signal that is already resolved, for tensors materialized without a kernel dispatch
    /// (e.g. a host-computed rotary frequency table uploaded directly to the device).
    pub fn ready() -> Self {
        let signal = Self::pending();
        signal.mark_ready();
        signal
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Blocks until the thread's command buffer has completed. Cheap (no device poll) once
    /// the signal has already fired.
    pub fn wait(&self, device: &Device) {
        if self.is_ready() {
            return;
        }
        device.poll();
        if !self.is_ready() {
            // wgpu's on_submitted_work_done callback is guaranteed to run by the time a
            // Maintain::Wait poll returns for work submitted before the poll call.
            warn!("thread signal still pending after a blocking poll; marking ready defensively");
            self.mark_ready();
        }
    }
}

/// One command buffer's worth of kernel dispatches.
pub struct KernelThread {
    device: Arc<Device>,
    cache: Arc<KernelCache>,
    encoder: Option<Encoder>,
    label: String,
    size: usize,
    capacity: usize,
    committed: bool,
    signal: ThreadSignal,
}

impl KernelThread {
    pub fn new(device: Arc<Device>, cache: Arc<KernelCache>, label: impl Into<String>, capacity: usize) -> Self {
        let label = label.into();
        let encoder = device.encoder(&label);
        Self {
            device,
            cache,
            encoder: Some(encoder),
            label,
            size: 0,
            capacity,
            committed: false,
            signal: ThreadSignal::pending(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether this thread can still accept a task: not yet committed and under capacity.
    pub fn joinable(&self) -> bool {
        !self.committed && self.size < self.capacity
    }

    pub fn signal(&self) -> ThreadSignal {
        self.signal.clone()
    }

    /// Encodes `task`'s dispatch into this thread's command buffer. Auto-commits once the
    /// thread reaches capacity; submission is triggered explicitly here rather than from a
    /// destructor since Rust has no `addCompletedHandler`-equivalent hook to rely on for GPU
    /// submission timing.
    pub fn push(&mut self, task: &mut KernelTask) -> Result<()> {
        if !self.joinable() {
            return Err(Error::ThreadNotJoinable);
        }
        task.mark_invoked()?;
        let module = self.cache.get_or_compile(task.name())?;
        let buffers = task.args().buffers();
        let label = task.name().canonical();
        let pipeline = self.device.layout().add_entries(buffers).pipeline(&label)?.build(&module);
        let grid = task.grid();
        let group = task.group();
        crate::grid::validate(grid, group, self.device.max_threads_per_group())?;
        let groups_x = crate::grid::workgroup_count(grid.x, group.x.max(1));
        let groups_y = crate::grid::workgroup_count(grid.y, group.y.max(1));
        let groups_z = crate::grid::workgroup_count(grid.z, group.z.max(1));
        let encoder = self.encoder.take().expect("encoder only taken once per push, replaced immediately");
        let encoder = encoder.pass(&label, |mut pass| {
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, pipeline.bind_group(), &[]);
            pass.dispatch_workgroups(groups_x, groups_y, groups_z);
            Ok(())
        })?;
        self.encoder = Some(encoder);
        self.size += 1;
        trace!(thread = %self.label, kernel = %label, size = self.size, capacity = self.capacity, "pushed kernel task");
        if self.size == self.capacity {
            self.commit();
        }
        Ok(())
    }

    /// Submits the accumulated command buffer and resolves this thread's signal once the
    /// device finishes executing it. Idempotent.
    pub fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        let Some(encoder) = self.encoder.take() else {
            return;
        };
        let commands = encoder.finish();
        self.device.submit(commands);
        let signal = self.signal.clone();
        self.device.on_submitted_work_done(move || signal.mark_ready());
        debug!(thread = %self.label, size = self.size, "committed kernel thread");
    }
}

impl Drop for KernelThread {
    /// If the thread was never explicitly committed, commit now so its work isn't silently
    /// dropped — mirrors `kernel_thread`'s `make_ready_at_thread_exit` destructor.
    fn drop(&mut self) {
        if !self.committed && self.encoder.is_some() {
            self.commit();
        }
    }
}

/// A simple pool that hands out the current joinable thread, rotating to a fresh one once the
/// current thread fills up. This is the Rust counterpart of
/// `shared_kernel_thread::get_this_thread()`.
pub struct ThreadPool {
    device: Arc<Device>,
    cache: Arc<KernelCache>,
    capacity: usize,
    current: Mutex<Option<KernelThread>>,
    generation: Mutex<usize>,
}

impl ThreadPool {
    pub fn new(device: Arc<Device>, cache: Arc<KernelCache>, capacity: usize) -> Self {
        Self {
            device,
            cache,
            capacity,
            current: Mutex::new(None),
            generation: Mutex::new(0),
        }
    }

    /// Pushes `task` onto the currently joinable thread, creating a new partition if the
    /// current one is full or doesn't exist yet. Returns the signal the caller should chain a
    /// future tensor on.
    pub fn push(&self, task: &mut KernelTask) -> Result<ThreadSignal> {
        let mut slot = self.current.lock().unwrap();
        if slot.as_ref().map(|t| !t.joinable()).unwrap_or(true) {
            let mut generation = self.generation.lock().unwrap();
            *generation += 1;
            let label = format!("partition-{}", *generation);
            *slot = Some(KernelThread::new(Arc::clone(&self.device), Arc::clone(&self.cache), label, self.capacity));
        }
        let thread = slot.as_mut().unwrap();
        thread.push(task)?;
        Ok(thread.signal())
    }

    /// Commits whatever thread is currently open, without waiting for a new task to trigger
    /// the capacity-based auto-commit. Used at the end of a decode step to flush partial
    /// partitions before the next `future_tensor::get`.
    pub fn flush(&self) {
        if let Some(thread) = self.current.lock().unwrap().as_mut() {
            thread.commit();
        }
    }
}
