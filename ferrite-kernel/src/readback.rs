//! Host readback of a GPU-resident tensor's bytes: a staging buffer, a copy into it, and an
//! async rendezvous with the mapped result. Adapted from the accelerator wrapper's stage/probe
//! split — the stage owns the buffer and drives the copy+map, the probe is the cheap, clonable
//! handle callers actually hold and `await` on.

use std::sync::Arc;

use flume::{Receiver, Sender};

use ferrite_gpu::{Buffer, BufferUsage, Device};

use crate::{Error, Result};

/// Owns the staging buffer a readout copies into and drives the map/poll/unmap dance.
pub struct Stage<T> {
    device: Arc<Device>,
    buffer: Buffer,
    sender: Sender<Vec<T>>,
    receiver: Receiver<Vec<T>>,
}

impl<T: bytemuck::Pod + Send + 'static> Stage<T> {
    pub fn new(device: Arc<Device>, count: usize) -> Self {
        let buffer = device.buffer(BufferUsage::Staging).empty(count * std::mem::size_of::<T>());
        let (sender, receiver) = flume::bounded(1);
        Self {
            device,
            buffer,
            sender,
            receiver,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn probe(&self) -> Probe<T> {
        Probe {
            receiver: self.receiver.clone(),
        }
    }

    /// Maps the staging buffer, blocks on the device until the map completes, and forwards
    /// the decoded values to any outstanding probe.
    pub async fn readout(&self) -> Result<()> {
        let buffer_slice = self.buffer.slice(..);
        let (map_sender, map_receiver) = flume::bounded(1);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = map_sender.send(result);
        });
        self.device.poll();
        map_receiver
            .recv_async()
            .await
            .map_err(|e| Error::GpuRuntimeError(e.to_string()))?
            .map_err(|e| Error::GpuRuntimeError(e.to_string()))?;
        let data = buffer_slice.get_mapped_range();
        let values: Vec<T> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        self.buffer.unmap();
        let _ = self.sender.try_send(values);
        Ok(())
    }
}

/// A cheap, clonable handle to a staged readout's eventual result.
pub struct Probe<T> {
    receiver: Receiver<Vec<T>>,
}

impl<T> Clone for Probe<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Probe<T> {
    pub async fn retrieve(&self) -> Result<Vec<T>> {
        self.receiver.recv_async().await.map_err(|e| Error::GpuRuntimeError(e.to_string()))
    }
}
