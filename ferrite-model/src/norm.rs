//! RMSNorm: `x · rsqrt(mean(x²) + ε) · weight`, weight shape `(D,)`.

use std::sync::Arc;

use ferrite_gpu::Device;
use ferrite_kernel::FutureTensor;
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::{Dtype, TensorView};

use crate::layer_delegate::delegate_layer;
use crate::Result;

pub const DEFAULT_EPS: f32 = 1e-5;

pub struct RmsNorm {
    base: ferrite_graph::BasicLayer,
    eps: f32,
}

impl RmsNorm {
    pub fn new(device: Arc<Device>, dim: usize, eps: f32) -> Self {
        let mut base = ferrite_graph::BasicLayer::new(device);
        base.declare_parameter("weight", Dtype::F32, vec![dim]);
        Self { base, eps }
    }

    pub fn forward(&self, rt: &Runtime, x: &TensorView<f32>) -> Result<FutureTensor<f32>> {
        let weight = ferrite_graph::Layer::parameters(&self.base).get("weight").expect("declared at construction");
        let weight = weight.view::<f32>("weight")?;
        Ok(ops::rmsnorm(rt, x, &weight, self.eps)?)
    }
}

delegate_layer!(RmsNorm);
