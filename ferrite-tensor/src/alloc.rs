//! The allocator stack: composable producers of `Storage`. Every concrete allocator accepts
//! either a plain byte size or a source byte slice to initialize from; decorators wrap an
//! inner allocator of the same container category (random↔random, gpu↔gpu) and add a single
//! cross-cutting concern — residency tracking, fixed-capacity sub-allocation, or type
//! erasure.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use ferrite_gpu::{Buffer, BufferUsage, Device};

use crate::storage::{Pin, Storage};
use crate::types::ElementType;
use crate::{Error, Result};

/// Produces `Storage` from either a byte size or a source byte slice. Implementors own the
/// decision of *where* the bytes live (heap vs. GPU buffer); callers above this layer only
/// know they got a container of at least the requested size.
pub trait Allocator: Send + Sync {
    fn allocate(&self, byte_size: usize) -> Result<Storage>;
    fn allocate_from(&self, source: &[u8]) -> Result<Storage>;
}

/// The dynamic-dispatch shim the runtime holds per accelerator thread so kernels can
/// allocate scratch tensors without knowing the concrete allocator chain in use.
pub type PolymorphicAllocator = Arc<dyn Allocator>;

// NOTE: random_memory

/// Heap new/delete. The default allocator for CPU-only tensors (id buffers, small sampler
/// workspaces that never touch the GPU).
pub struct RandomMemoryAllocator;

impl Allocator for RandomMemoryAllocator {
    fn allocate(&self, byte_size: usize) -> Result<Storage> {
        Ok(Storage::random(byte_size))
    }

    fn allocate_from(&self, source: &[u8]) -> Result<Storage> {
        Ok(Storage::vector(source.to_vec()))
    }
}

// NOTE: gpu_memory

/// Driver buffer creation with unified storage mode — the baseline GPU allocator every other
/// GPU-category allocator wraps.
pub struct GpuMemoryAllocator {
    device: Arc<Device>,
}

impl GpuMemoryAllocator {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }
}

impl Allocator for GpuMemoryAllocator {
    fn allocate(&self, byte_size: usize) -> Result<Storage> {
        let buffer = self.device.buffer(BufferUsage::ReadWrite).empty(byte_size);
        Ok(Storage::gpu_buffer(buffer, byte_size, Vec::new()))
    }

    fn allocate_from(&self, source: &[u8]) -> Result<Storage> {
        let buffer = self.device.buffer(BufferUsage::ReadWrite).with_data(source);
        Ok(Storage::gpu_buffer(buffer, source.len(), Vec::new()))
    }
}

// NOTE: gpu_nocopy

/// Constructs a buffer whose bytes alias caller-provided memory — the archive loader's
/// mmap'd regions flow through here. wgpu's safe surface has no "no-copy" buffer
/// constructor (unlike raw Metal's `newBufferWithBytesNoCopy`), so `allocate_from` below
/// performs a single upload rather than true zero-copy aliasing; the allocator still pins
/// the source region (typically an `Mmap`) for the buffer's lifetime, preserving the
/// lifetime contract a true no-copy mapping would require. See DESIGN.md for why this
/// compromise was made.
pub struct GpuNocopyAllocator {
    inner: GpuMemoryAllocator,
}

impl GpuNocopyAllocator {
    pub fn new(inner: GpuMemoryAllocator) -> Self {
        Self { inner }
    }

    /// Allocates from a source slice while pinning an auxiliary object (e.g. the archive's
    /// `Mmap`) for the resulting buffer's lifetime.
    pub fn allocate_pinned(&self, source: &[u8], pin: Pin) -> Result<Storage> {
        let storage = self.inner.allocate_from(source)?;
        let buffer = storage.gpu_buffer_arc().expect("gpu_memory always returns a gpu buffer");
        Ok(Storage::gpu_buffer_shared(Arc::clone(buffer), source.len(), vec![pin]))
    }
}

impl Allocator for GpuNocopyAllocator {
    fn allocate(&self, byte_size: usize) -> Result<Storage> {
        self.inner.allocate(byte_size)
    }

    fn allocate_from(&self, source: &[u8]) -> Result<Storage> {
        self.inner.allocate_from(source)
    }
}

// NOTE: gpu_resident

struct ResidentState {
    set: Vec<Weak<Buffer>>,
    committed: bool,
    detached: bool,
    capacity: usize,
}

/// Decorator that tracks buffers needing residency while in use. Each allocation is added to
/// a shared set guarded by an internal mutex; `commit()` requests residency for the set as it
/// currently stands, `detach()` commits and forbids further additions. The set's membership
/// is tracked via weak references so that once every container referencing a buffer drops,
/// the next `gc()` call observes the set has emptied and residency naturally ends — modeling
/// "ends residency when the refcount returns to zero after at least one commit" without a
/// bespoke per-buffer drop hook.
pub struct GpuResidentAllocator {
    inner: GpuMemoryAllocator,
    state: Mutex<ResidentState>,
}

impl GpuResidentAllocator {
    pub fn new(inner: GpuMemoryAllocator, capacity: usize) -> Self {
        Self {
            inner,
            state: Mutex::new(ResidentState {
                set: Vec::new(),
                committed: false,
                detached: false,
                capacity,
            }),
        }
    }

    fn track(&self, storage: &Storage) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.detached {
            return Err(Error::InvalidArgument("residency set is detached; cannot add further buffers".into()));
        }
        if state.set.len() >= state.capacity {
            warn!("residency set capacity ({}) exceeded", state.capacity);
            return Err(Error::CapacityExceeded { limit: state.capacity });
        }
        let handle = storage.gpu_buffer_arc().expect("gpu_resident wraps a gpu allocator");
        state.set.push(Arc::downgrade(handle));
        Ok(())
    }

    /// Registers a storage this allocator did not itself create — used when a caller builds
    /// the buffer through a different decorator (e.g. `gpu_nocopy`, for a buffer aliasing a
    /// memory-mapped archive) but still wants it covered by this allocator's residency set.
    pub fn adopt(&self, storage: &Storage) -> Result<()> {
        self.track(storage)
    }

    /// Marks the current set as residency-requested. Idempotent.
    pub fn commit(&self) {
        self.state.lock().unwrap().committed = true;
    }

    /// Commits the current set as final and forbids further additions; residency is
    /// requested immediately.
    pub fn detach(&self) {
        let mut state = self.state.lock().unwrap();
        state.committed = true;
        state.detached = true;
    }

    /// Prunes dead entries and reports whether the set has gone empty since the last commit
    /// (i.e. residency has ended).
    pub fn gc(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.set.retain(|w| w.upgrade().is_some());
        state.committed && state.set.is_empty()
    }
}

impl Allocator for GpuResidentAllocator {
    fn allocate(&self, byte_size: usize) -> Result<Storage> {
        let storage = self.inner.allocate(byte_size)?;
        self.track(&storage)?;
        Ok(storage)
    }

    fn allocate_from(&self, source: &[u8]) -> Result<Storage> {
        let storage = self.inner.allocate_from(source)?;
        self.track(&storage)?;
        Ok(storage)
    }
}

// NOTE: gpu_heap

struct HeapState {
    cursor: usize,
    outstanding: Arc<AtomicUsize>,
}

/// A guard placed in a sub-allocated container's pins so that dropping the container
/// decrements the heap's outstanding count; the heap ends residency once this reaches zero.
struct HeapSliceGuard {
    outstanding: Arc<AtomicUsize>,
}

impl Drop for HeapSliceGuard {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pre-allocates one contiguous unified buffer of fixed capacity and sub-allocates aligned
/// chunks out of it. Used during decoding so per-step scratch tensors don't each pay a
/// driver allocation.
pub struct GpuHeapAllocator {
    buffer: Arc<Buffer>,
    capacity: usize,
    alignment: usize,
    state: Mutex<HeapState>,
}

impl GpuHeapAllocator {
    pub fn new(device: &Device, capacity: usize, alignment: usize) -> Self {
        let buffer = device.buffer(BufferUsage::ReadWrite).empty(capacity);
        Self {
            buffer: Arc::new(buffer),
            capacity,
            alignment: alignment.max(1),
            state: Mutex::new(HeapState {
                cursor: 0,
                outstanding: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().outstanding.load(Ordering::Acquire)
    }

    fn sub_allocate(&self, byte_size: usize) -> Result<(usize, Arc<AtomicUsize>)> {
        let mut state = self.state.lock().unwrap();
        let aligned = state.cursor.div_ceil(self.alignment) * self.alignment;
        if aligned + byte_size > self.capacity {
            return Err(Error::AllocError(format!(
                "gpu_heap: requested {byte_size} bytes at offset {aligned} exceeds capacity {}",
                self.capacity
            )));
        }
        state.cursor = aligned + byte_size;
        state.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok((aligned, Arc::clone(&state.outstanding)))
    }
}

impl Allocator for GpuHeapAllocator {
    fn allocate(&self, byte_size: usize) -> Result<Storage> {
        let (offset, outstanding) = self.sub_allocate(byte_size)?;
        let guard: Pin = Arc::new(HeapSliceGuard { outstanding });
        let full = Storage::gpu_buffer_shared(Arc::clone(&self.buffer), self.capacity, vec![guard]);
        full.slice(offset, byte_size)
    }

    fn allocate_from(&self, source: &[u8]) -> Result<Storage> {
        // The heap is a pre-allocated unified buffer; "from source" still sub-allocates and
        // then relies on the caller to upload via a kernel copy, since writing host bytes
        // into an arbitrary offset of a shared heap buffer is a GPU-side operation here.
        self.allocate(source.len())
    }
}

// NOTE: rebind<T>

/// Type-erases a byte-oriented allocator into one that thinks in elements of `T`.
pub struct Rebind<'a, T: ElementType> {
    inner: &'a dyn Allocator,
    phantom: std::marker::PhantomData<T>,
}

impl<'a, T: ElementType> Rebind<'a, T> {
    pub fn new(inner: &'a dyn Allocator) -> Self {
        Self {
            inner,
            phantom: std::marker::PhantomData,
        }
    }

    pub fn allocate(&self, count: usize) -> Result<Storage> {
        self.inner.allocate(count * std::mem::size_of::<T>())
    }

    pub fn allocate_from(&self, data: &[T]) -> Result<Storage> {
        self.inner.allocate_from(bytemuck::cast_slice(data))
    }
}

/// Any `Arc<dyn Any + Send + Sync>` can serve as a storage pin; this just documents the
/// common case of pinning an `Arc<T>` we already hold elsewhere.
pub fn pin<T: Any + Send + Sync>(value: Arc<T>) -> Pin {
    value
}
