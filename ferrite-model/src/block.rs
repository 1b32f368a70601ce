//! Transformer block: `x + attn(rmsnorm(x))`, then `x + ff(rmsnorm(x))`.

use std::sync::Arc;

use ferrite_gpu::Device;
use ferrite_kernel::FutureTensor;
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::TensorView;
use indexmap::IndexMap;

use crate::attention::Attention;
use crate::feed_forward::FeedForward;
use crate::norm::RmsNorm;
use crate::Result;

pub struct Block {
    attention_norm: RmsNorm,
    attention: Attention,
    ffn_norm: RmsNorm,
    feed_forward: FeedForward,
    empty_parameters: IndexMap<String, ferrite_graph::Parameter>,
}

impl Block {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rt: &Runtime,
        device: Arc<Device>,
        dim: usize,
        hidden_dim: usize,
        n_heads: usize,
        n_kv_heads: usize,
        head_dim: usize,
        max_seq_len: usize,
        sink_len: usize,
        rope_theta: f32,
        use_scaled_rope: bool,
        norm_eps: f32,
    ) -> Result<Self> {
        Ok(Self {
            attention_norm: RmsNorm::new(Arc::clone(&device), dim, norm_eps),
            attention: Attention::new(rt, dim, n_heads, n_kv_heads, head_dim, max_seq_len, sink_len, rope_theta, use_scaled_rope)?,
            ffn_norm: RmsNorm::new(Arc::clone(&device), dim, norm_eps),
            feed_forward: FeedForward::new(device, dim, hidden_dim),
            empty_parameters: IndexMap::new(),
        })
    }

    pub fn forward(&mut self, rt: &Runtime, x: &TensorView<f32>) -> Result<FutureTensor<f32>> {
        let device = Arc::clone(rt.device());

        let normed = self.attention_norm.forward(rt, x)?;
        rt.flush();
        let attn_out = self.attention.forward(rt, normed.get(&device))?;
        rt.flush();
        let residual = ops::add(rt, x, attn_out.get(&device))?;
        rt.flush();

        let normed2 = self.ffn_norm.forward(rt, residual.get(&device))?;
        rt.flush();
        let ff_out = self.feed_forward.forward(rt, normed2.get(&device))?;
        rt.flush();
        Ok(ops::add(rt, residual.get(&device), ff_out.get(&device))?)
    }
}

impl ferrite_graph::Layer for Block {
    fn parameters(&self) -> &IndexMap<String, ferrite_graph::Parameter> {
        &self.empty_parameters
    }

    fn parameters_mut(&mut self) -> &mut IndexMap<String, ferrite_graph::Parameter> {
        &mut self.empty_parameters
    }

    fn children(&self) -> Vec<(&str, &dyn ferrite_graph::Layer)> {
        vec![
            ("attention_norm", &self.attention_norm as &dyn ferrite_graph::Layer),
            ("attention", &self.attention as &dyn ferrite_graph::Layer),
            ("ffn_norm", &self.ffn_norm as &dyn ferrite_graph::Layer),
            ("feed_forward", &self.feed_forward as &dyn ferrite_graph::Layer),
        ]
    }

    fn child(&self, name: &str) -> Option<&dyn ferrite_graph::Layer> {
        match name {
            "attention_norm" => Some(&self.attention_norm),
            "attention" => Some(&self.attention),
            "ffn_norm" => Some(&self.ffn_norm),
            "feed_forward" => Some(&self.feed_forward),
            _ => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut (dyn ferrite_graph::Layer + '_)> {
        match name {
            "attention_norm" => Some(&mut self.attention_norm),
            "attention" => Some(&mut self.attention),
            "ffn_norm" => Some(&mut self.ffn_norm),
            "feed_forward" => Some(&mut self.feed_forward),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_gpu::Accelerator;

    async fn runtime() -> Runtime {
        let device = Accelerator::default_device().await.expect("no compatible GPU adapter for test");
        Runtime::new(Arc::new(device))
    }

    fn filled(rt: &Runtime, sizes: Vec<usize>, value: f32) -> TensorView<f32> {
        let numel: usize = sizes.iter().product();
        let storage = rt.allocator().allocate_from(bytemuck::cast_slice(&vec![value; numel])).unwrap();
        TensorView::new(sizes, Arc::new(storage)).unwrap()
    }

    fn bind_random_weights(rt: &Runtime, layer: &mut dyn ferrite_graph::Layer) {
        let mut paths = Vec::new();
        ferrite_graph::apply(&*layer, true, &mut |path, param| {
            if path.ends_with("weight") && param.dtype() == ferrite_tensor::Dtype::F32 {
                paths.push((path.to_string(), param.shape().to_vec()));
            }
        });
        for (path, shape) in paths {
            let numel: usize = shape.iter().product();
            let storage = rt.allocator().allocate_from(bytemuck::cast_slice(&vec![0.01f32; numel])).unwrap();
            ferrite_graph::set_parameter(layer, &path, ferrite_tensor::Dtype::F32, shape, Arc::new(storage)).unwrap();
        }
    }

    #[tokio::test]
    async fn forward_preserves_input_shape_through_both_residuals() {
        let rt = runtime().await;
        let dim = 8;
        let mut block = Block::new(&rt, Arc::clone(rt.device()), dim, 16, 2, 1, 4, 16, 4, 10_000.0, false, 1e-5).unwrap();
        bind_random_weights(&rt, &mut block);
        let x = filled(&rt, vec![1, 3, dim], 0.1);
        let out = block.forward(&rt, &x).unwrap();
        rt.flush();
        assert_eq!(out.get(rt.device()).sizes(), &[1, 3, dim]);
    }
}
