//! Grouped-query attention with rotary position embeddings and an attention-sink cache.
//! `wq`/`wk` project to `n_heads`/`n_kv_heads` distinct heads; keys/values are repeated up to
//! `n_heads` before the scaled dot product so every query head gets its own key/value pair.

use std::sync::Arc;

use ferrite_kernel::{FutureTensor, ThreadSignal};
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::TensorView;
use indexmap::IndexMap;

use crate::cache::{causal_mask, SinkCache};
use crate::linear::Linear;
use crate::Result;

pub struct Attention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    n_heads: usize,
    n_kv_heads: usize,
    head_dim: usize,
    rope_theta: f32,
    use_scaled_rope: bool,
    cache: SinkCache,
    empty_parameters: IndexMap<String, ferrite_graph::Parameter>,
}

impl Attention {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rt: &Runtime,
        dim: usize,
        n_heads: usize,
        n_kv_heads: usize,
        head_dim: usize,
        max_seq_len: usize,
        sink_len: usize,
        rope_theta: f32,
        use_scaled_rope: bool,
    ) -> Result<Self> {
        let device = Arc::clone(rt.device());
        Ok(Self {
            wq: Linear::new(Arc::clone(&device), dim, n_heads * head_dim),
            wk: Linear::new(Arc::clone(&device), dim, n_kv_heads * head_dim),
            wv: Linear::new(Arc::clone(&device), dim, n_kv_heads * head_dim),
            wo: Linear::new(device, n_heads * head_dim, dim),
            n_heads,
            n_kv_heads,
            head_dim,
            rope_theta,
            use_scaled_rope,
            cache: SinkCache::new(rt, 1, n_kv_heads, head_dim, max_seq_len, sink_len)?,
            empty_parameters: IndexMap::new(),
        })
    }

    pub fn forward(&mut self, rt: &Runtime, x: &TensorView<f32>) -> Result<FutureTensor<f32>> {
        let seq_len = x.sizes()[1];
        let device = Arc::clone(rt.device());

        let q = self.wq.forward(rt, x)?;
        let k = self.wk.forward(rt, x)?;
        let v = self.wv.forward(rt, x)?;
        rt.flush();

        let q_heads = q.get(&device).view(&[seq_len as isize, self.n_heads as isize, self.head_dim as isize])?;
        let k_heads = k.get(&device).view(&[seq_len as isize, self.n_kv_heads as isize, self.head_dim as isize])?;
        let v_heads = v.get(&device).view(&[seq_len as isize, self.n_kv_heads as isize, self.head_dim as isize])?;

        let start_pos = self.cache.next_rope_pos();
        let (cos, sin) = ops::rope_freqs(rt, self.head_dim, start_pos, seq_len, self.rope_theta, self.use_scaled_rope)?;
        rt.flush();

        let q_rot = self.apply_rope_per_head(rt, &q_heads, self.n_heads, &cos, &sin, start_pos as u32)?;
        let k_rot = self.apply_rope_per_head(rt, &k_heads, self.n_kv_heads, &cos, &sin, start_pos as u32)?;
        rt.flush();

        let k_rot4 = k_rot.view(&[1, seq_len as isize, self.n_kv_heads as isize, self.head_dim as isize])?;
        let v4 = v_heads.view(&[1, seq_len as isize, self.n_kv_heads as isize, self.head_dim as isize])?;
        let (cached_k, cached_v, _) = self.cache.write(rt, &k_rot4, &v4)?;
        let key_len = cached_k.sizes()[1];

        let cached_k = cached_k.view(&[key_len as isize, self.n_kv_heads as isize, self.head_dim as isize])?;
        let cached_v = cached_v.view(&[key_len as isize, self.n_kv_heads as isize, self.head_dim as isize])?;
        let expanded_k = self.repeat_kv(rt, &cached_k, key_len)?;
        let expanded_v = self.repeat_kv(rt, &cached_v, key_len)?;
        rt.flush();

        // (L, H, D) -> (H, L, D); (Lk, H, D) -> (H, Lk, D) -> (H, D, Lk).
        let q_bh = q_rot.transpose(&[1, 0, 2])?;
        let q_bh = ops::copy(rt, &q_bh)?;
        let k_bh = expanded_k.get(&device).transpose(&[1, 0, 2])?;
        let k_bh = ops::copy(rt, &k_bh)?;
        rt.flush();
        let k_bh_t = k_bh.get(&device).transpose(&[0, 2, 1])?;
        let k_bh_t = ops::copy(rt, &k_bh_t)?;
        let v_bh = expanded_v.get(&device).transpose(&[1, 0, 2])?;
        let v_bh = ops::copy(rt, &v_bh)?;
        rt.flush();

        let raw_scores = ops::matmul(rt, q_bh.get(&device), k_bh_t.get(&device))?;
        rt.flush();
        let scale = 1.0 / (self.head_dim as f32).sqrt();
        let scaled = ops::scalar_mul(rt, raw_scores.get(&device), scale)?;
        rt.flush();

        let masked = match causal_mask(rt, 1, self.n_heads, seq_len, key_len)? {
            Some(mask) => {
                rt.flush();
                let scores3 = scaled.get(&device).view(&[1, self.n_heads as isize, seq_len as isize, key_len as isize])?;
                let mask_view = mask.get(&device).view(&[1, self.n_heads as isize, seq_len as isize, key_len as isize])?;
                let summed = ops::add(rt, &scores3, &mask_view)?;
                rt.flush();
                summed.get(&device).view(&[self.n_heads as isize, seq_len as isize, key_len as isize])?
            }
            None => scaled.get(&device).clone(),
        };

        let probs = ops::softmax(rt, &masked)?;
        rt.flush();
        let attended = ops::matmul(rt, probs.get(&device), v_bh.get(&device))?;
        rt.flush();

        // (H, L, D) -> (L, H, D) -> (L, H*D)
        let transposed = attended.get(&device).transpose(&[1, 0, 2])?;
        let contiguous = ops::copy(rt, &transposed)?;
        rt.flush();
        let flat = contiguous.get(&device).view(&[1, seq_len as isize, (self.n_heads * self.head_dim) as isize])?;

        self.wo.forward(rt, &flat)
    }

    fn apply_rope_per_head(
        &self,
        rt: &Runtime,
        heads: &TensorView<f32>,
        n_heads: usize,
        cos: &FutureTensor<f32>,
        sin: &FutureTensor<f32>,
        start_pos: u32,
    ) -> Result<TensorView<f32>> {
        let device = Arc::clone(rt.device());
        let seq_len = heads.sizes()[0];
        let mut rotated = Vec::with_capacity(n_heads);
        for h in 0..n_heads {
            let one_head = heads.narrow(1, h, 1)?.transpose(&[0, 1, 2])?;
            let contiguous = ops::copy(rt, &one_head)?;
            rt.flush();
            let flat = contiguous.get(&device).view(&[seq_len as isize, self.head_dim as isize])?;
            let out = ops::rope(rt, &flat, cos.get(&device), sin.get(&device), start_pos)?;
            rotated.push(out);
        }
        rt.flush();
        let output = rt.alloc_output::<f32>(vec![seq_len, n_heads, self.head_dim])?;
        for (h, future) in rotated.iter().enumerate() {
            let dst = output.narrow(1, h, 1)?.view(&[seq_len as isize, self.head_dim as isize])?;
            ops::copy_into(rt, dst, future.get(&device))?;
        }
        rt.flush();
        Ok(output)
    }

    fn repeat_kv(&self, rt: &Runtime, cached: &TensorView<f32>, key_len: usize) -> Result<FutureTensor<f32>> {
        let repeats = self.n_heads / self.n_kv_heads;
        let output = rt.alloc_output::<f32>(vec![key_len, self.n_heads, self.head_dim])?;
        for kv in 0..self.n_kv_heads {
            let src = cached.narrow(1, kv, 1)?;
            for r in 0..repeats {
                let h = kv * repeats + r;
                let dst = output.narrow(1, h, 1)?;
                ops::copy_into(rt, dst, &src)?;
            }
        }
        rt.flush();
        Ok(FutureTensor::new(output, ThreadSignal::ready()))
    }
}

impl ferrite_graph::Layer for Attention {
    fn parameters(&self) -> &IndexMap<String, ferrite_graph::Parameter> {
        &self.empty_parameters
    }

    fn parameters_mut(&mut self) -> &mut IndexMap<String, ferrite_graph::Parameter> {
        &mut self.empty_parameters
    }

    fn children(&self) -> Vec<(&str, &dyn ferrite_graph::Layer)> {
        vec![
            ("wq", &self.wq as &dyn ferrite_graph::Layer),
            ("wk", &self.wk as &dyn ferrite_graph::Layer),
            ("wv", &self.wv as &dyn ferrite_graph::Layer),
            ("wo", &self.wo as &dyn ferrite_graph::Layer),
        ]
    }

    fn child(&self, name: &str) -> Option<&dyn ferrite_graph::Layer> {
        match name {
            "wq" => Some(&self.wq),
            "wk" => Some(&self.wk),
            "wv" => Some(&self.wv),
            "wo" => Some(&self.wo),
            _ => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut (dyn ferrite_graph::Layer + '_)> {
        match name {
            "wq" => Some(&mut self.wq),
            "wk" => Some(&mut self.wk),
            "wv" => Some(&mut self.wv),
            "wo" => Some(&mut self.wo),
            _ => None,
        }
    }
}

/// HuggingFace checkpoints store `wq`/`wk` rows as `(heads, 2, half_dim)`; the RoPE kernel's
/// paired access expects `(heads, half_dim, 2)`. Applied once to the raw weight at load time.
pub fn permute_huggingface_rope_heads(rt: &Runtime, weight: &TensorView<f32>, n_heads: usize, head_dim: usize) -> Result<FutureTensor<f32>> {
    let in_features = weight.sizes()[1];
    let half_dim = head_dim / 2;
    let reshaped = weight.view(&[n_heads as isize, 2, half_dim as isize, in_features as isize])?;
    let permuted = reshaped.transpose(&[0, 2, 1, 3])?;
    let copied = ops::copy(rt, &permuted)?;
    rt.flush();
    let device = rt.device();
    let flattened = copied.get(device).view(&[(n_heads * head_dim) as isize, in_features as isize])?;
    Ok(FutureTensor::new(flattened, ThreadSignal::ready()))
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

    /// Binds every declared `"weight"` leaf (skipping the unused quantized slots) to a small
    /// constant tensor, so a freshly-constructed tree can run `forward()` in a test without a
    /// real checkpoint.
    pub(crate) fn bind_random_weights(rt: &Runtime, layer: &mut dyn ferrite_graph::Layer) {
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
    async fn forward_produces_one_logit_row_per_token_dim() {
        let rt = runtime().await;
        let dim = 8;
        let mut attn = Attention::new(&rt, dim, 2, 1, 4, 16, 4, 10_000.0, false).unwrap();
        bind_random_weights(&rt, &mut attn);
        let x = filled(&rt, vec![1, 3, dim], 0.1);
        let out = attn.forward(&rt, &x).unwrap();
        rt.flush();
        assert_eq!(out.get(rt.device()).sizes(), &[1, 3, dim]);
    }

    #[tokio::test]
    async fn successive_decode_steps_advance_the_cache_position() {
        let rt = runtime().await;
        let dim = 8;
        let mut attn = Attention::new(&rt, dim, 2, 1, 4, 16, 4, 10_000.0, false).unwrap();
        bind_random_weights(&rt, &mut attn);
        let prefill = filled(&rt, vec![1, 3, dim], 0.1);
        attn.forward(&rt, &prefill).unwrap();
        rt.flush();
        assert_eq!(attn.cache.next_rope_pos(), 3);

        let decode = filled(&rt, vec![1, 1, dim], 0.2);
        attn.forward(&rt, &decode).unwrap();
        rt.flush();
        assert_eq!(attn.cache.next_rope_pos(), 4);
    }

    #[tokio::test]
    async fn permute_huggingface_rope_heads_keeps_the_row_count() {
        let rt = runtime().await;
        let n_heads = 2;
        let head_dim = 4;
        let in_features = 8;
        let weight = filled(&rt, vec![n_heads * head_dim, in_features], 1.0);
        let permuted = permute_huggingface_rope_heads(&rt, &weight, n_heads, head_dim).unwrap();
        rt.flush();
        assert_eq!(permuted.get(rt.device()).sizes(), &[n_heads * head_dim, in_features]);
    }
}
