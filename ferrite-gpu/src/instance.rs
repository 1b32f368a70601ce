//! Entry point for the wgpu backend: creates the `wgpu::Instance`, requests an adapter, and
//! resolves a default compute-only device for the current platform. The runtime targets
//! Apple-silicon GPUs through wgpu's Metal backend, but nothing below this module is
//! Metal-specific — only the instance's backend bits select it.

use bon::bon;

use crate::adapter::AdapterBuilder;
use crate::{Device, Result};

/// Handle to the wgpu instance. Does not itself own a device; call `adapter()` to negotiate
/// one with the driver.
pub struct Accelerator {
    instance: wgpu::Instance,
}

#[bon]
impl Accelerator {
    /// Creates a new `Accelerator` bound to the specified GPU backends.
    ///
    /// # Parameters
    /// - `backends`: The GPU backends to use (e.g. Metal, Vulkan, DX12).
    #[builder]
    pub fn new(backends: wgpu::Backends) -> Accelerator {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Accelerator { instance }
    }

    /// Creates a new `AdapterBuilder` for negotiating a GPU adapter.
    pub fn adapter(self) -> AdapterBuilder {
        AdapterBuilder::new(self.instance)
    }

    /// Requests a default compute device using the primary backend for the host platform.
    ///
    /// On Apple silicon this resolves to the Metal adapter, which exposes unified memory: GPU
    /// buffers are CPU-visible without a staging round trip for mappable buffers.
    pub async fn default_device() -> Result<Device> {
        let instance = Self::builder().backends(wgpu::Backends::PRIMARY).build();
        instance.adapter().request().await?.device().request().await
    }
}
