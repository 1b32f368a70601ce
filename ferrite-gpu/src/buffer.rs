//! GPU buffer creation. A `Buffer` is the bottom of the storage stack: the `gpu-buffer`
//! storage variant in `ferrite-tensor` wraps one of these, and the allocator stack in
//! `ferrite-tensor::alloc` decides whether it owns freshly-allocated bytes or aliases an
//! existing mapped region (the `gpu_nocopy` allocator).

use std::ops::Deref;
use wgpu::util::DeviceExt;

use crate::Device;

/// Usage class for a buffer, matching the access pattern the runtime needs from it.
#[derive(Copy, Clone, Debug)]
pub enum BufferUsage {
    /// `MAP_READ | COPY_DST`. Used to read tensor values back to the host.
    Staging,
    /// `STORAGE | COPY_SRC`. Read-only input to a kernel.
    Read,
    /// `STORAGE | COPY_SRC | COPY_DST`. Written by one kernel, read by another.
    ReadWrite,
    /// `STORAGE | COPY_DST`. Write-only kernel output.
    Write,
}

impl BufferUsage {
    fn usage(&self) -> wgpu::BufferUsages {
        use wgpu::BufferUsages as Usage;
        match self {
            Self::Staging => Usage::MAP_READ | Usage::COPY_DST,
            Self::Read => Usage::STORAGE | Usage::COPY_SRC,
            Self::Write => Usage::STORAGE | Usage::COPY_DST,
            Self::ReadWrite => Usage::STORAGE | Usage::COPY_SRC | Usage::COPY_DST,
        }
    }
}

/// A GPU-resident buffer. Not `Clone`: callers that need shared ownership of one buffer
/// (the allocator stack's `gpu_resident`/`gpu_heap` decorators, `Storage`'s GPU backing) wrap
/// it in an `Arc` themselves rather than relying on the handle being cheaply copyable.
pub struct Buffer {
    buffer: wgpu::Buffer,
    usage: BufferUsage,
}

impl Buffer {
    fn new(buffer: wgpu::Buffer, usage: BufferUsage) -> Self {
        Self { buffer, usage }
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Deref for Buffer {
    type Target = wgpu::Buffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

/// Builder for creating and configuring a GPU buffer.
pub struct BufferBuilder<'a, 'device> {
    device: &'device Device,
    label: Option<&'a str>,
    usage: BufferUsage,
}

impl<'a, 'device> BufferBuilder<'a, 'device> {
    pub fn new(device: &'device Device, usage: BufferUsage) -> Self {
        Self {
            device,
            label: None,
            usage,
        }
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    /// Creates an empty buffer of `size` bytes. Used by `gpu_memory` and `gpu_heap`.
    pub fn empty(self, size: usize) -> Buffer {
        self.check_size(size as u64);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: self.label,
            size: size as u64,
            usage: self.usage.usage(),
            mapped_at_creation: false,
        });
        Buffer::new(buffer, self.usage)
    }

    /// Creates a buffer pre-initialized with `data`. Used when a container is constructed
    /// from a source pointer rather than allocated empty.
    pub fn with_data<T>(self, data: &'a [T]) -> Buffer
    where
        T: bytemuck::Pod,
    {
        self.check_size(std::mem::size_of_val(data) as u64);
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: self.label,
            contents: bytemuck::cast_slice(data),
            usage: self.usage.usage(),
        });
        Buffer::new(buffer, self.usage)
    }

    /// The archive loader is responsible for keeping every partition under this limit before
    /// it ever reaches a buffer builder; this only catches a partitioning bug early, in debug
    /// builds, rather than handing the driver a request it will reject outright.
    fn check_size(&self, size: u64) {
        let max = self.device.max_buffer_size();
        debug_assert!(
            size <= max,
            "buffer request of {size} bytes exceeds device max_buffer_size {max}"
        );
    }
}
