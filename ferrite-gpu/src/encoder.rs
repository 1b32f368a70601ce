//! Command encoder wrapper. One `Encoder` records into exactly one `wgpu::CommandBuffer`; the
//! kernel runtime's `Thread` (see `ferrite-kernel`) owns one encoder at a time and calls
//! `finish()` on commit.

use tracing::trace;

use crate::{Buffer, Device, Error};

pub struct Encoder {
    encoder: wgpu::CommandEncoder,
}

impl Encoder {
    pub fn new(device: &Device, label: &str) -> Self {
        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        trace!("created command encoder '{label}'");
        Self { encoder }
    }

    /// Begins a compute pass and lets the caller encode dispatches into it.
    pub fn pass<F>(mut self, label: &str, call: F) -> Result<Self, Error>
    where
        F: FnOnce(wgpu::ComputePass) -> anyhow::Result<()>,
    {
        let compute_pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        call(compute_pass).map_err(Error::ComputeError)?;
        Ok(self)
    }

    /// Copies one buffer's contents to another, same size. Used for readout into a staging
    /// buffer and for the sink cache's prefix-preserving copy on rollover.
    pub fn copy_buffer(&mut self, source: &Buffer, destination: &Buffer) {
        let size = source.size();
        self.encoder.copy_buffer_to_buffer(source, 0, destination, 0, size);
    }

    /// Copies a byte range from one buffer to another at arbitrary offsets. Used when binding
    /// a parameter to a slice of a larger archive buffer.
    pub fn copy_buffer_range(&mut self, source: &Buffer, source_offset: u64, destination: &Buffer, destination_offset: u64, size: u64) {
        self.encoder
            .copy_buffer_to_buffer(source, source_offset, destination, destination_offset, size);
    }

    pub fn finish(self) -> wgpu::CommandBuffer {
        self.encoder.finish()
    }
}
