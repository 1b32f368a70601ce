//! The full transformer: `tok_embeddings -> N blocks -> norm -> output`, sliced to the last
//! sequence position before the final projection so decoding never pays for logits over
//! positions it will discard.

use std::sync::Arc;

use ferrite_gpu::Device;
use ferrite_kernel::FutureTensor;
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::TensorView;
use indexmap::IndexMap;

use crate::block::Block;
use crate::embedding::Embedding;
use crate::linear::Linear;
use crate::norm::RmsNorm;
use crate::options::Options;
use crate::Result;

pub struct Model {
    tok_embeddings: Embedding,
    layers: ferrite_graph::LayerArray<Block>,
    norm: RmsNorm,
    output: Linear,
    options: Options,
    empty_parameters: IndexMap<String, ferrite_graph::Parameter>,
}

impl Model {
    pub fn new(rt: &Runtime, device: Arc<Device>, options: Options) -> Result<Self> {
        let mut layers = ferrite_graph::LayerArray::new();
        for _ in 0..options.n_layers {
            let sink_len = options.sink_prefix_len();
            layers.emplace_back(|_| {
                Block::new(
                    rt,
                    Arc::clone(&device),
                    options.head_dim * options.n_heads,
                    options.hidden_dim,
                    options.n_heads,
                    options.n_kv_heads,
                    options.head_dim,
                    options.max_seq_len,
                    sink_len,
                    options.rope_theta,
                    options.use_scaled_rope,
                    options.norm_eps,
                )
                .expect("block construction only fails if the GPU rejects an allocation")
            });
        }
        let dim = options.head_dim * options.n_heads;
        Ok(Self {
            tok_embeddings: Embedding::new(Arc::clone(&device), options.vocab_size, dim),
            layers,
            norm: RmsNorm::new(Arc::clone(&device), dim, options.norm_eps),
            output: Linear::new(device, dim, options.vocab_size),
            options,
            empty_parameters: IndexMap::new(),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Binds every parameter this tree declares against `archive`, skipping any archive
    /// entry that doesn't match a declared name (adapters may leave extras behind). When
    /// `permute_rope_heads` is set (checkpoints adapted by `HuggingfaceAdapter`), `wq`/`wk`
    /// rows are re-laid-out from `(heads, 2, half_dim)` to `(heads, half_dim, 2)` before
    /// binding, matching the paired layout the RoPE kernel expects.
    pub fn load_archive(&mut self, rt: &Runtime, archive: &ferrite_archive::Archive, permute_rope_heads: bool) -> Result<()> {
        let mut paths = Vec::new();
        ferrite_graph::apply(&*self, true, &mut |path, _param| paths.push(path.to_string()));
        for path in paths {
            let Some(entry) = archive.get(&path) else { continue };
            let n_heads = if path.ends_with(".attention.wq.weight") {
                Some(self.options.n_heads)
            } else if path.ends_with(".attention.wk.weight") {
                Some(self.options.n_kv_heads)
            } else {
                None
            };
            match (permute_rope_heads, n_heads) {
                (true, Some(n_heads)) => {
                    let raw = TensorView::<f32>::new(entry.shape.clone(), Arc::clone(&entry.container))?;
                    let permuted = crate::attention::permute_huggingface_rope_heads(rt, &raw, n_heads, self.options.head_dim)?;
                    rt.flush();
                    let view = permuted.get(rt.device());
                    ferrite_graph::set_parameter(self, &path, entry.dtype, view.sizes().to_vec(), Arc::clone(view.container()))?;
                }
                _ => {
                    ferrite_graph::set_parameter(self, &path, entry.dtype, entry.shape.clone(), Arc::clone(&entry.container))?;
                }
            }
        }
        Ok(())
    }

    /// Runs one forward step over `ids` (a single batch row) and returns logits over the
    /// last position, shape `(1, 1, vocab_size)`.
    pub fn forward(&mut self, rt: &Runtime, ids: &[i32]) -> Result<FutureTensor<f32>> {
        let seq_len = ids.len();
        let storage = rt.allocator().allocate_from(bytemuck::cast_slice(ids))?;
        let ids_view = TensorView::new(vec![1, seq_len], Arc::new(storage))?;

        let embedded = self.tok_embeddings.forward(rt, &ids_view)?;
        rt.flush();
        let device = Arc::clone(rt.device());

        let mut hidden = embedded.get(&device).clone();
        for i in 0..self.layers.size() {
            let block = self.layers.at_mut(i).expect("index within size()");
            let out = block.forward(rt, &hidden)?;
            rt.flush();
            hidden = out.get(&device).clone();
        }

        let normed = self.norm.forward(rt, &hidden)?;
        rt.flush();
        let last = normed.get(&device).narrow(1, seq_len - 1, 1)?;
        let last = ops::copy(rt, &last)?;
        rt.flush();

        self.output.forward(rt, last.get(&device))
    }
}

impl ferrite_graph::Layer for Model {
    fn parameters(&self) -> &IndexMap<String, ferrite_graph::Parameter> {
        &self.empty_parameters
    }

    fn parameters_mut(&mut self) -> &mut IndexMap<String, ferrite_graph::Parameter> {
        &mut self.empty_parameters
    }

    fn children(&self) -> Vec<(&str, &dyn ferrite_graph::Layer)> {
        vec![
            ("tok_embeddings", &self.tok_embeddings as &dyn ferrite_graph::Layer),
            ("layers", &self.layers as &dyn ferrite_graph::Layer),
            ("norm", &self.norm as &dyn ferrite_graph::Layer),
            ("output", &self.output as &dyn ferrite_graph::Layer),
        ]
    }

    fn child(&self, name: &str) -> Option<&dyn ferrite_graph::Layer> {
        match name {
            "tok_embeddings" => Some(&self.tok_embeddings),
            "layers" => Some(&self.layers),
            "norm" => Some(&self.norm),
            "output" => Some(&self.output),
            _ => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut (dyn ferrite_graph::Layer + '_)> {
        match name {
            "tok_embeddings" => Some(&mut self.tok_embeddings),
            "layers" => Some(&mut self.layers),
            "norm" => Some(&mut self.norm),
            "output" => Some(&mut self.output),
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

    fn toy_options() -> Options {
        Options {
            head_dim: 4,
            n_heads: 2,
            n_kv_heads: 1,
            n_layers: 2,
            hidden_dim: 16,
            max_seq_len: 16,
            vocab_size: 32,
            rope_theta: 10_000.0,
            norm_eps: 1e-5,
            heap_size: 1 << 20,
            use_scaled_rope: false,
        }
    }

    #[tokio::test]
    async fn forward_returns_logits_over_the_last_position_only() {
        let rt = runtime().await;
        let options = toy_options();
        let mut model = Model::new(&rt, Arc::clone(rt.device()), options).unwrap();
        bind_random_weights(&rt, &mut model);
        let out = model.forward(&rt, &[3, 7, 1, 9]).unwrap();
        rt.flush();
        assert_eq!(out.get(rt.device()).sizes(), &[1, 1, options.vocab_size]);
    }

    #[tokio::test]
    async fn successive_forward_calls_keep_decoding_one_token_at_a_time() {
        let rt = runtime().await;
        let options = toy_options();
        let mut model = Model::new(&rt, Arc::clone(rt.device()), options).unwrap();
        bind_random_weights(&rt, &mut model);
        model.forward(&rt, &[3, 7, 1]).unwrap();
        rt.flush();
        let next = model.forward(&rt, &[5]).unwrap();
        rt.flush();
        assert_eq!(next.get(rt.device()).sizes(), &[1, 1, options.vocab_size]);
    }

    #[test]
    fn sink_prefix_len_shrinks_the_window_relative_to_max_seq_len() {
        let options = toy_options();
        assert_eq!(options.sink_prefix_len(), 4);
        assert!(options.sink_prefix_len() < options.max_seq_len);
    }
}
