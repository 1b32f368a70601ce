//! Lazy compile-and-cache of kernel shader modules by name. Compilation is the expensive
//! part of dispatching a kernel; the bind group (which depends on the specific buffers a
//! task touches) is rebuilt fresh for every dispatch, but the compiled `wgpu::ShaderModule`
//! behind it is cached so repeat dispatches of the same kernel name never recompile.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ferrite_gpu::Device;

use crate::name::KernelName;

/// Something that knows the WGSL source for a given kernel name. `ferrite-ops` implements
/// this over its fixed kernel library.
pub trait KernelSource: Send + Sync {
    fn source(&self, name: &KernelName) -> Option<&str>;
}

/// Caches compiled shader modules by canonical kernel name.
pub struct KernelCache {
    device: Arc<Device>,
    source: Arc<dyn KernelSource>,
    modules: Mutex<HashMap<String, Arc<wgpu::ShaderModule>>>,
}

impl KernelCache {
    pub fn new(device: Arc<Device>, source: Arc<dyn KernelSource>) -> Self {
        Self {
            device,
            source,
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the compiled shader module for `name`, compiling and caching it on first use.
    pub fn get_or_compile(&self, name: &KernelName) -> crate::Result<Arc<wgpu::ShaderModule>> {
        let key = name.canonical();
        let mut modules = self.modules.lock().unwrap();
        if let Some(module) = modules.get(&key) {
            return Ok(Arc::clone(module));
        }
        let source = self
            .source
            .source(name)
            .ok_or_else(|| crate::Error::MalformedKernelName(key.clone()))?;
        let module = Arc::new(self.device.shader(&key, source));
        modules.insert(key, Arc::clone(&module));
        Ok(module)
    }

    pub fn len(&self) -> usize {
        self.modules.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
