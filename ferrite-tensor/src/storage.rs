//! Storage: the byte range backing a tensor, independent of shape. A `Storage` is shared by
//! reference count across every `TensorView` that aliases it; narrowing, transposing, or
//! flattening a view never touches the underlying `Storage`, only the view's own
//! sizes/strides/offsets.

use std::any::Any;
use std::sync::Arc;

use memmap2::Mmap;

use ferrite_gpu::Buffer;

use crate::{Error, Result};

/// An auxiliary object a GPU buffer storage keeps alive for as long as the buffer lives —
/// most commonly the memory-mapped archive file a `gpu_nocopy` allocator wrapped without
/// copying.
pub type Pin = Arc<dyn Any + Send + Sync>;

/// Ownership mode of a `Storage`'s bytes.
enum Backing {
    /// Process heap, exclusively owned.
    Random(Arc<Vec<u8>>),
    /// Heap-backed dynamic array, exclusively owned. Distinguished from `Random` at the type
    /// level only to document provenance (built up incrementally vs. allocated once); the
    /// Rust representation is identical.
    Vector(Arc<Vec<u8>>),
    /// Inline single element.
    Scalar(Arc<Vec<u8>>),
    /// Driver-managed buffer, CPU-visible through unified memory. Shared ownership; pins
    /// arbitrary auxiliaries (e.g. the archive's `Mmap`) for its lifetime.
    GpuBuffer { buffer: Arc<Buffer>, pins: Vec<Pin> },
    /// Bytes of a memory-mapped file. The mapping may be declared or undeclared independently
    /// of this container's lifetime (see `declare_mapped`/`undeclare_mapped`).
    FileMapped { mmap: Arc<Mmap>, declared: bool },
}

/// A byte range with an ownership mode, plus its offset within a (possibly larger) backing
/// allocation so that slicing a storage never copies.
pub struct Storage {
    backing: Backing,
    byte_offset: usize,
    byte_len: usize,
}

impl Storage {
    /// Allocates `len` zeroed bytes on the process heap (`random_memory`).
    pub fn random(len: usize) -> Self {
        Self {
            backing: Backing::Random(Arc::new(vec![0u8; len])),
            byte_offset: 0,
            byte_len: len,
        }
    }

    /// Wraps an already-built byte vector as a `vector` storage (e.g. the result of an
    /// incremental CPU-side build, like token id accumulation in the decoder loop).
    pub fn vector(bytes: Vec<u8>) -> Self {
        let byte_len = bytes.len();
        Self {
            backing: Backing::Vector(Arc::new(bytes)),
            byte_offset: 0,
            byte_len,
        }
    }

    /// Wraps a single element's bytes as an inline `scalar` storage.
    pub fn scalar(bytes: Vec<u8>) -> Self {
        let byte_len = bytes.len();
        Self {
            backing: Backing::Scalar(Arc::new(bytes)),
            byte_offset: 0,
            byte_len,
        }
    }

    /// Wraps a GPU buffer. `pins` are kept alive for as long as this storage (and any storage
    /// sliced from it) lives.
    pub fn gpu_buffer(buffer: Buffer, byte_len: usize, pins: Vec<Pin>) -> Self {
        Self::gpu_buffer_shared(Arc::new(buffer), byte_len, pins)
    }

    /// Wraps an already-shared GPU buffer handle. Used when the caller (an allocator
    /// decorator) already holds the `Arc<Buffer>` and wants to avoid re-wrapping it.
    pub fn gpu_buffer_shared(buffer: Arc<Buffer>, byte_len: usize, pins: Vec<Pin>) -> Self {
        Self {
            backing: Backing::GpuBuffer { buffer, pins },
            byte_offset: 0,
            byte_len,
        }
    }

    /// Wraps a memory-mapped file. Starts undeclared: the archive loader calls
    /// `declare_mapped` once it has finished partitioning regions out of it.
    pub fn file_mapped(mmap: Mmap) -> Self {
        let byte_len = mmap.len();
        Self {
            backing: Backing::FileMapped {
                mmap: Arc::new(mmap),
                declared: false,
            },
            byte_offset: 0,
            byte_len,
        }
    }

    /// Returns a new storage aliasing a byte sub-range of this one. Never copies.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self> {
        if offset + len > self.byte_len {
            return Err(Error::InvalidArgument(format!(
                "slice [{offset}, {end}) exceeds storage of size {size}",
                end = offset + len,
                size = self.byte_len
            )));
        }
        let backing = match &self.backing {
            Backing::Random(b) => Backing::Random(Arc::clone(b)),
            Backing::Vector(b) => Backing::Vector(Arc::clone(b)),
            Backing::Scalar(b) => Backing::Scalar(Arc::clone(b)),
            Backing::GpuBuffer { buffer, pins } => Backing::GpuBuffer {
                buffer: Arc::clone(buffer),
                pins: pins.clone(),
            },
            Backing::FileMapped { mmap, declared } => Backing::FileMapped {
                mmap: Arc::clone(mmap),
                declared: *declared,
            },
        };
        Ok(Self {
            backing,
            byte_offset: self.byte_offset + offset,
            byte_len: len,
        })
    }

    pub fn byte_size(&self) -> usize {
        self.byte_len
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// CPU-visible bytes backing this storage, if any. GPU buffers require an explicit
    /// readout (see `ferrite-kernel::future_tensor`) rather than synchronous access, since
    /// wgpu buffers must be mapped before the CPU may read them.
    pub fn raw_data(&self) -> Option<&[u8]> {
        let full = match &self.backing {
            Backing::Random(b) | Backing::Vector(b) | Backing::Scalar(b) => b.as_slice(),
            Backing::FileMapped { mmap, .. } => mmap.as_ref(),
            Backing::GpuBuffer { .. } => return None,
        };
        Some(&full[self.byte_offset..self.byte_offset + self.byte_len])
    }

    pub fn gpu_buffer_handle(&self) -> Option<&Buffer> {
        match &self.backing {
            Backing::GpuBuffer { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    /// The shared handle itself, for callers that need to extend its lifetime independently
    /// of this `Storage` (the residency set, the fixed-capacity heap allocator).
    pub fn gpu_buffer_arc(&self) -> Option<&Arc<Buffer>> {
        match &self.backing {
            Backing::GpuBuffer { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::FileMapped { declared: true, .. })
    }

    pub fn declare_mapped(&mut self) {
        if let Backing::FileMapped { declared, .. } = &mut self.backing {
            *declared = true;
        }
    }

    pub fn undeclare_mapped(&mut self) {
        if let Backing::FileMapped { declared, .. } = &mut self.backing {
            *declared = false;
        }
    }
}
