//! The transformer module tree: token embedding, grouped-query attention with an
//! attention-sink KV cache, SwiGLU feed-forward, and the block/model composition that ties
//! them to an options file and a loaded weight archive.

mod attention;
mod block;
mod cache;
mod embedding;
mod error;
mod feed_forward;
mod layer_delegate;
mod linear;
mod model;
mod norm;
mod options;

pub use attention::{permute_huggingface_rope_heads, Attention};
pub use block::Block;
pub use cache::{causal_mask, SinkCache};
pub use embedding::Embedding;
pub use error::{Error, Result};
pub use feed_forward::FeedForward;
pub use linear::Linear;
pub use model::Model;
pub use norm::RmsNorm;
pub use options::Options;
