//! Logical connection to the GPU: resource creation, command encoding, and submission.
//! `Device` is the shared handle every other crate in the workspace holds (usually behind an
//! `Arc`) to talk to the accelerator.

use std::ops::Deref;

use crate::buffer::BufferBuilder;
use crate::pipeline::LayoutBuilder;
use crate::{BufferUsage, Encoder, Error};

/// A wgpu device and its associated submission queue.
pub struct Device {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl Device {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Device {
        Self { device, queue }
    }

    /// Creates a new command encoder with the given label.
    pub fn encoder(&self, label: &str) -> Encoder {
        Encoder::new(self, label)
    }

    /// Creates a new buffer builder for the given usage class.
    pub fn buffer(&self, buffer_kind: BufferUsage) -> BufferBuilder {
        BufferBuilder::new(self, buffer_kind)
    }

    /// Compiles a shader module from WGSL source. Kernel names are resolved to source and
    /// entry point by the caller (see `ferrite-kernel`); this method only owns compilation.
    pub fn shader(&self, label: &str, source: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    }

    /// Submits a finished command buffer to the queue.
    pub fn submit(&self, commands: wgpu::CommandBuffer) {
        self.queue.submit(std::iter::once(commands));
    }

    /// Creates a new layout builder for configuring bind groups and pipelines.
    pub fn layout(&self) -> LayoutBuilder {
        LayoutBuilder::new(self)
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// The largest single buffer the driver will allocate. The archive loader partitions
    /// tensor payloads across multiple GPU buffers so no partition exceeds this.
    pub fn max_buffer_size(&self) -> u64 {
        self.device.limits().max_buffer_size
    }

    /// The largest threadgroup (workgroup) a dispatch may use. Grid validation in
    /// `ferrite-kernel` rejects any task whose threadgroup volume exceeds this.
    pub fn max_threads_per_group(&self) -> u32 {
        let limits = self.device.limits();
        limits.max_compute_invocations_per_workgroup
    }

    /// Blocks the calling thread until all submitted work up to this point has completed.
    /// Used by the GPU-readback rendezvous (`future_tensor::get`) to drive buffer unmapping.
    pub fn poll(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Registers a callback fired once every command buffer submitted so far has completed.
    /// Used by `ferrite-kernel`'s kernel thread to resolve a partition's shared future without
    /// a blocking wait on the submitting thread.
    pub fn on_submitted_work_done(&self, callback: impl FnOnce() + Send + 'static) {
        self.queue.on_submitted_work_done(callback);
    }
}

impl Deref for Device {
    type Target = wgpu::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

/// Builder for requesting a `Device` from an `Adapter`.
pub struct DeviceBuilder {
    adapter: wgpu::Adapter,
    features: wgpu::Features,
    limits: wgpu::Limits,
}

impl DeviceBuilder {
    pub fn new(adapter: wgpu::Adapter) -> Self {
        let max_storage_buffers_per_shader_stage = adapter.limits().max_storage_buffers_per_shader_stage;
        DeviceBuilder {
            adapter,
            features: wgpu::Features::default(),
            limits: wgpu::Limits {
                max_storage_buffers_per_shader_stage,
                ..Default::default()
            },
        }
    }

    pub async fn request(self) -> Result<Device, Error> {
        let (device, queue) = self
            .adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: self.features,
                    required_limits: self.limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;
        Ok(Device::new(device, queue))
    }

    pub fn with_features(mut self, features: wgpu::Features) -> Self {
        self.features |= features;
        self
    }

    pub fn with_limits(mut self, limits: wgpu::Limits) -> Self {
        self.limits = limits;
        self
    }
}
