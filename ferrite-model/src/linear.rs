//! A linear projection whose weight may be bound either as a dense `f32` tensor or as an
//! int8-quantized pair (`weight_q`, per-row `weight_scale`). The forward pass dequantizes via
//! `hadamard_broadcast` before the matmul when the quantized representation is the one that
//! got bound; a checkpoint never provides both.

use std::sync::Arc;

use ferrite_gpu::Device;
use ferrite_kernel::FutureTensor;
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::{Dtype, TensorView};

use crate::layer_delegate::delegate_layer;
use crate::{Error, Result};

pub struct Linear {
    base: ferrite_graph::BasicLayer,
}

impl Linear {
    pub fn new(device: Arc<Device>, in_features: usize, out_features: usize) -> Self {
        let mut base = ferrite_graph::BasicLayer::new(device);
        base.declare_parameter("weight", Dtype::F32, vec![out_features, in_features]);
        base.declare_parameter("weight_q", Dtype::I8, vec![out_features, in_features]);
        base.declare_parameter("weight_scale", Dtype::F32, vec![out_features, 1]);
        Self { base }
    }

    pub fn forward(&self, rt: &Runtime, x: &TensorView<f32>) -> Result<FutureTensor<f32>> {
        let params = ferrite_graph::Layer::parameters(&self.base);
        if let Some(dense) = params.get("weight").filter(|p| p.is_bound()) {
            let weight = dense.view::<f32>("weight")?;
            let weight_t = weight.transpose(&[1, 0])?;
            return Ok(ops::matmul(rt, x, &weight_t)?);
        }
        let quantized = params.get("weight_q").filter(|p| p.is_bound());
        let scale = params.get("weight_scale").filter(|p| p.is_bound());
        if let (Some(qw), Some(qs)) = (quantized, scale) {
            let weights = qw.view::<i8>("weight_q")?;
            let scales = qs.view::<f32>("weight_scale")?;
            let dequant = ops::hadamard_broadcast::<f32>(rt, &scales, &weights)?;
            rt.flush();
            let dequant_view = dequant.get(rt.device()).clone();
            let weight_t = dequant_view.transpose(&[1, 0])?;
            return Ok(ops::matmul(rt, x, &weight_t)?);
        }
        Err(Error::UnboundLinear("weight".to_string()))
    }
}

delegate_layer!(Linear);
