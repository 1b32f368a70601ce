//! Bundles the pieces a kernel dispatch needs — the device, the compiled-shader cache, and the
//! thread pool that partitions dispatches into command buffers — plus the GPU allocator ops use
//! to materialize their outputs. One `Runtime` is shared across an entire decode session.

use std::sync::Arc;

use ferrite_gpu::Device;
use ferrite_kernel::{KernelCache, ThreadPool};
use ferrite_tensor::{Allocator, ElementType, GpuMemoryAllocator, PolymorphicAllocator, TensorView};

use crate::shaders::KernelLibrary;
use crate::Result;

/// Partition size used by the default runtime: the number of kernel dispatches a single
/// command buffer accumulates before it auto-commits. Chosen generously enough that a whole
/// transformer block's dispatches usually land in one partition.
pub const DEFAULT_PARTITION_CAPACITY: usize = 64;

pub struct Runtime {
    device: Arc<Device>,
    cache: Arc<KernelCache>,
    pool: ThreadPool,
    allocator: PolymorphicAllocator,
}

impl Runtime {
    pub fn new(device: Arc<Device>) -> Self {
        Self::with_partition_capacity(device, DEFAULT_PARTITION_CAPACITY)
    }

    pub fn with_partition_capacity(device: Arc<Device>, partition_capacity: usize) -> Self {
        let cache = Arc::new(KernelCache::new(Arc::clone(&device), Arc::new(KernelLibrary::new())));
        let pool = ThreadPool::new(Arc::clone(&device), Arc::clone(&cache), partition_capacity);
        let allocator: PolymorphicAllocator = Arc::new(GpuMemoryAllocator::new(Arc::clone(&device)));
        Self {
            device,
            cache,
            pool,
            allocator,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn cache(&self) -> &Arc<KernelCache> {
        &self.cache
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn allocator(&self) -> &PolymorphicAllocator {
        &self.allocator
    }

    /// Commits whatever partition is currently open. Call at the end of a decode step so a
    /// caller blocking on a future tensor's signal doesn't wait on work that was never
    /// submitted.
    pub fn flush(&self) {
        self.pool.flush();
    }

    /// Allocates a fresh GPU-resident output tensor of `sizes`.
    pub fn alloc_output<T: ElementType>(&self, sizes: Vec<usize>) -> Result<TensorView<T>> {
        let numel: usize = sizes.iter().product();
        let storage = self.allocator.allocate(numel * std::mem::size_of::<T>())?;
        Ok(TensorView::new(sizes, Arc::new(storage))?)
    }
}
