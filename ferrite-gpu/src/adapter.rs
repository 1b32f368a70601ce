//! Adapters abstract over physical GPU hardware. An `Adapter` is queried from a wgpu
//! instance and exposes the device limits (`max_buffer_size`, `max_storage_buffers...`)
//! the rest of the runtime sizes its allocator chains and kernel grids against.

use std::ops::Deref;

use tracing::trace;

use crate::{device::DeviceBuilder, Error};

/// A GPU adapter: the capability/limits surface the allocator stack and kernel runtime
/// query before committing to a device.
pub struct Adapter {
    adapter: wgpu::Adapter,
}

impl Adapter {
    pub fn new(adapter: wgpu::Adapter) -> Self {
        Self { adapter }
    }

    /// Starts building the logical `Device` this adapter will back.
    pub fn device(self) -> DeviceBuilder {
        DeviceBuilder::new(self.adapter)
    }
}

impl Deref for Adapter {
    type Target = wgpu::Adapter;
    fn deref(&self) -> &Self::Target {
        &self.adapter
    }
}

/// Builder for requesting an adapter from a wgpu instance.
pub struct AdapterBuilder {
    instance: wgpu::Instance,
    request_adapter_options: wgpu::RequestAdapterOptions<'static, 'static>,
}

impl AdapterBuilder {
    pub fn new(instance: wgpu::Instance) -> Self {
        Self {
            instance,
            request_adapter_options: wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            },
        }
    }

    /// Requests the adapter asynchronously, failing with `CreateAdapterError` if the driver
    /// has nothing compatible to offer.
    pub async fn request(self) -> Result<Adapter, Error> {
        let adapter = self
            .instance
            .request_adapter(&self.request_adapter_options)
            .await
            .ok_or(Error::CreateAdapterError)?;
        trace!("requested adapter '{}'", adapter.get_info().name);
        Ok(Adapter::new(adapter))
    }
}
