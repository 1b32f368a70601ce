//! Model hyperparameters, loaded from either of two JSON schemas. Both name the same
//! logical fields under different keys; `Options::from_reference`/`from_huggingface` parse
//! the schema-specific shape and normalize it into one struct the rest of the crate uses.

use serde::Deserialize;

use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub head_dim: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub n_layers: usize,
    pub hidden_dim: usize,
    pub max_seq_len: usize,
    pub vocab_size: usize,
    pub rope_theta: f32,
    pub norm_eps: f32,
    pub heap_size: usize,
    pub use_scaled_rope: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            head_dim: 128,
            n_heads: 32,
            n_kv_heads: 8,
            n_layers: 32,
            hidden_dim: swiglu_hidden_dim(4096, None, 256),
            max_seq_len: 8192,
            vocab_size: 128_256,
            rope_theta: 500_000.0,
            norm_eps: 1e-5,
            heap_size: 1 << 28,
            use_scaled_rope: false,
        }
    }
}

/// The reference SwiGLU hidden dimension: start at `2/3` of the usual `4*dim` MLP width,
/// scale by `ffn_dim_multiplier` if the checkpoint overrides it, then round up to the
/// nearest multiple of `multiple_of` (kernels prefer nicely-tiled matmul widths).
fn swiglu_hidden_dim(dim: usize, ffn_dim_multiplier: Option<f32>, multiple_of: usize) -> usize {
    let base = (2 * (4 * dim)) / 3;
    let scaled = match ffn_dim_multiplier {
        Some(mult) => (mult * base as f32) as usize,
        None => base,
    };
    multiple_of * scaled.div_ceil(multiple_of)
}

/// The `dim`/`n_heads`/… schema used by reference llama checkpoints.
#[derive(Debug, Deserialize)]
struct ReferenceSchema {
    dim: usize,
    n_layers: usize,
    n_heads: usize,
    n_kv_heads: usize,
    vocab_size: usize,
    #[serde(default)]
    ffn_dim_multiplier: Option<f32>,
    #[serde(default = "default_multiple_of")]
    multiple_of: usize,
    #[serde(default)]
    norm_eps: Option<f32>,
    #[serde(default)]
    rope_theta: Option<f32>,
    #[serde(default)]
    use_scaled_rope: bool,
    #[serde(default)]
    max_seq_len: Option<usize>,
}

fn default_multiple_of() -> usize {
    256
}

/// The `hidden_size`/`num_hidden_layers`/… schema used by HuggingFace `config.json` files.
#[derive(Debug, Deserialize)]
struct HuggingfaceSchema {
    hidden_size: usize,
    intermediate_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    num_key_value_heads: usize,
    vocab_size: usize,
    #[serde(default)]
    rms_norm_eps: Option<f32>,
    #[serde(default)]
    rope_theta: Option<f32>,
    #[serde(default)]
    max_position_embeddings: Option<usize>,
}

impl Options {
    pub fn from_reference_json(bytes: &[u8]) -> Result<Self> {
        let schema: ReferenceSchema = serde_json::from_slice(bytes)?;
        let defaults = Self::default();
        Ok(Self {
            head_dim: schema.dim / schema.n_heads,
            n_heads: schema.n_heads,
            n_kv_heads: schema.n_kv_heads,
            n_layers: schema.n_layers,
            hidden_dim: swiglu_hidden_dim(schema.dim, schema.ffn_dim_multiplier, schema.multiple_of),
            max_seq_len: schema.max_seq_len.unwrap_or(defaults.max_seq_len),
            vocab_size: schema.vocab_size,
            rope_theta: schema.rope_theta.unwrap_or(defaults.rope_theta),
            norm_eps: schema.norm_eps.unwrap_or(defaults.norm_eps),
            heap_size: defaults.heap_size,
            use_scaled_rope: schema.use_scaled_rope,
        })
    }

    pub fn from_huggingface_json(bytes: &[u8]) -> Result<Self> {
        let schema: HuggingfaceSchema = serde_json::from_slice(bytes)?;
        let defaults = Self::default();
        Ok(Self {
            head_dim: schema.hidden_size / schema.num_attention_heads,
            n_heads: schema.num_attention_heads,
            n_kv_heads: schema.num_key_value_heads,
            n_layers: schema.num_hidden_layers,
            hidden_dim: schema.intermediate_size,
            max_seq_len: schema.max_position_embeddings.unwrap_or(defaults.max_seq_len),
            vocab_size: schema.vocab_size,
            rope_theta: schema.rope_theta.unwrap_or(defaults.rope_theta),
            norm_eps: schema.rms_norm_eps.unwrap_or(defaults.norm_eps),
            heap_size: defaults.heap_size,
            use_scaled_rope: true,
        })
    }

    /// Sink cache prefix length: `floor(log2(max_seq_len))`.
    pub fn sink_prefix_len(&self) -> usize {
        (usize::BITS - 1 - self.max_seq_len.max(1).leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_schema_derives_head_dim() {
        let json = serde_json::json!({
            "dim": 4096, "n_layers": 32, "n_heads": 32, "n_kv_heads": 8,
            "vocab_size": 128256, "norm_eps": 1e-5, "rope_theta": 500000.0,
            "use_scaled_rope": true,
        });
        let opts = Options::from_reference_json(&serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(opts.head_dim, 128);
        assert!(opts.use_scaled_rope);
    }

    #[test]
    fn huggingface_schema_renames_fields() {
        let json = serde_json::json!({
            "hidden_size": 4096, "intermediate_size": 14336, "num_hidden_layers": 32,
            "num_attention_heads": 32, "num_key_value_heads": 8, "vocab_size": 128256,
            "rms_norm_eps": 1e-5, "rope_theta": 500000.0,
        });
        let opts = Options::from_huggingface_json(&serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(opts.head_dim, 128);
        assert_eq!(opts.n_kv_heads, 8);
        assert_eq!(opts.hidden_dim, 14336);
    }

    #[test]
    fn reference_schema_rounds_hidden_dim_to_multiple_of() {
        let json = serde_json::json!({
            "dim": 4096, "n_layers": 32, "n_heads": 32, "n_kv_heads": 8,
            "vocab_size": 128256, "ffn_dim_multiplier": 1.3, "multiple_of": 1024,
        });
        let opts = Options::from_reference_json(&serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(opts.hidden_dim % 1024, 0);
        assert!(opts.hidden_dim >= (1.3 * (2.0 * 4096.0 * 4.0 / 3.0)) as usize);
    }

    #[test]
    fn sink_prefix_len_is_floor_log2() {
        let opts = Options { max_seq_len: 8192, ..Options::default() };
        assert_eq!(opts.sink_prefix_len(), 13);
    }
}
