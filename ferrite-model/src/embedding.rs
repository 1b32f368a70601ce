//! Token embedding table: row `i` of `weight` is the embedding for token id `i`.

use std::sync::Arc;

use ferrite_gpu::Device;
use ferrite_kernel::FutureTensor;
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::{Dtype, TensorView};

use crate::layer_delegate::delegate_layer;
use crate::Result;

pub struct Embedding {
    base: ferrite_graph::BasicLayer,
}

impl Embedding {
    pub fn new(device: Arc<Device>, vocab_size: usize, dim: usize) -> Self {
        let mut base = ferrite_graph::BasicLayer::new(device);
        base.declare_parameter("weight", Dtype::F32, vec![vocab_size, dim]);
        Self { base }
    }

    pub fn forward(&self, rt: &Runtime, ids: &TensorView<i32>) -> Result<FutureTensor<f32>> {
        let weight = ferrite_graph::Layer::parameters(&self.base).get("weight").expect("declared at construction");
        let weight = weight.view::<f32>("weight")?;
        Ok(ops::embedding(rt, ids, &weight)?)
    }
}

delegate_layer!(Embedding);
