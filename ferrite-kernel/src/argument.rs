//! Kernel argument encoding. A kernel argument is either a tensor (its packed `Layout` plus
//! its data buffer — two consecutive bindings) or a scalar (one small buffer holding its raw
//! bytes, since wgpu's portable surface has no direct equivalent of Metal's `setBytes`).

use std::sync::Arc;

use ferrite_gpu::{Buffer, BufferUsage, Device};
use ferrite_tensor::{ElementType, Layout, Storage, TensorView};

/// One bound argument, already materialized as the buffer(s) a dispatch will bind.
pub enum Argument {
    Tensor { layout: Buffer, data: Arc<Buffer> },
    Scalar { data: Buffer },
}

/// Accumulates a kernel task's bound arguments in binding order. `bind_front`/`bind_back`
/// let a partially-applied task grow from either end, matching the kernel task's
/// curry-by-name usage in the decoder loop (e.g. binding `eps` once and reusing the task
/// across every block).
#[derive(Default)]
pub struct ArgumentList {
    args: Vec<Argument>,
}

impl ArgumentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_tensor<T: ElementType>(&mut self, device: &Device, view: &TensorView<T>) -> ferrite_tensor::Result<()> {
        let layout = device.buffer(BufferUsage::Read).with_data(std::slice::from_ref(&view.layout()));
        let data = view
            .container()
            .gpu_buffer_arc()
            .cloned()
            .ok_or_else(|| ferrite_tensor::Error::InvalidArgument("tensor argument must be GPU-resident".into()))?;
        self.args.push(Argument::Tensor { layout, data });
        Ok(())
    }

    pub fn bind_scalar<T: bytemuck::Pod>(&mut self, device: &Device, value: T) {
        let data = device.buffer(BufferUsage::Read).with_data(std::slice::from_ref(&value));
        self.args.push(Argument::Scalar { data });
    }

    pub fn bind_front_tensor<T: ElementType>(&mut self, device: &Device, view: &TensorView<T>) -> ferrite_tensor::Result<()> {
        let layout = device.buffer(BufferUsage::Read).with_data(std::slice::from_ref(&view.layout()));
        let data = view
            .container()
            .gpu_buffer_arc()
            .cloned()
            .ok_or_else(|| ferrite_tensor::Error::InvalidArgument("tensor argument must be GPU-resident".into()))?;
        self.args.insert(0, Argument::Tensor { layout, data });
        Ok(())
    }

    /// Flattens to the sequence of buffer references a pipeline's bind group expects, in
    /// binding order (tensor layout, tensor data, next argument, ...).
    pub fn buffers(&self) -> Vec<&Buffer> {
        let mut out = Vec::with_capacity(self.args.len() * 2);
        for arg in &self.args {
            match arg {
                Argument::Tensor { layout, data } => {
                    out.push(layout);
                    out.push(data.as_ref());
                }
                Argument::Scalar { data } => out.push(data),
            }
        }
        out
    }

    pub fn binding_count(&self) -> usize {
        self.buffers().len()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Encodes a `Layout` as the tiny buffer every tensor argument carries alongside its data.
pub fn layout_buffer(device: &Device, layout: &Layout) -> Buffer {
    device.buffer(BufferUsage::Read).with_data(std::slice::from_ref(layout))
}

/// Dummy storage helper retained for callers constructing a tensor argument from raw bytes
/// rather than an existing `TensorView` (e.g. sampler scratch buffers in `ferrite-ops`).
pub fn scalar_storage(bytes: Vec<u8>) -> Storage {
    Storage::vector(bytes)
}
