//! Adapters translate an archive's on-disk tensor names into the names the layer graph
//! expects to bind against. Each adapter consumes an `Archive` and returns one, possibly
//! renamed and/or with aliases inserted — the archive itself never learns which naming
//! convention produced it.

use regex::Regex;

use crate::archive::Archive;
use crate::Result;

pub trait Adapter {
    fn adapt(&self, archive: Archive) -> Result<Archive>;
}

/// Leaves every name untouched; only inserts the `output.weight := tok_embeddings.weight`
/// alias used by checkpoints that tie the embedding and output projection.
pub struct ReferenceAdapter;

impl Adapter for ReferenceAdapter {
    fn adapt(&self, mut archive: Archive) -> Result<Archive> {
        alias_tied_output(&mut archive, "tok_embeddings.weight");
        Ok(archive)
    }
}

/// Renames HuggingFace-style checkpoint keys (`model.layers.N.self_attn.q_proj.weight`) to
/// this crate's layer-graph paths (`layers.N.attention.wq.weight`), then applies the same
/// embedding/output tie as `ReferenceAdapter`.
pub struct HuggingfaceAdapter {
    rules: Vec<(Regex, &'static str)>,
}

impl Default for HuggingfaceAdapter {
    fn default() -> Self {
        let rules = vec![
            (Regex::new(r"^model\.embed_tokens\.").unwrap(), "tok_embeddings."),
            (Regex::new(r"^model\.norm\.").unwrap(), "norm."),
            (Regex::new(r"^lm_head\.").unwrap(), "output."),
            (Regex::new(r"^model\.layers\.(\d+)\.self_attn\.q_proj\.").unwrap(), "layers.$1.attention.wq."),
            (Regex::new(r"^model\.layers\.(\d+)\.self_attn\.k_proj\.").unwrap(), "layers.$1.attention.wk."),
            (Regex::new(r"^model\.layers\.(\d+)\.self_attn\.v_proj\.").unwrap(), "layers.$1.attention.wv."),
            (Regex::new(r"^model\.layers\.(\d+)\.self_attn\.o_proj\.").unwrap(), "layers.$1.attention.wo."),
            (Regex::new(r"^model\.layers\.(\d+)\.mlp\.gate_proj\.").unwrap(), "layers.$1.feed_forward.w1."),
            (Regex::new(r"^model\.layers\.(\d+)\.mlp\.down_proj\.").unwrap(), "layers.$1.feed_forward.w2."),
            (Regex::new(r"^model\.layers\.(\d+)\.mlp\.up_proj\.").unwrap(), "layers.$1.feed_forward.w3."),
            (Regex::new(r"^model\.layers\.(\d+)\.input_layernorm\.").unwrap(), "layers.$1.attention_norm."),
            (Regex::new(r"^model\.layers\.(\d+)\.post_attention_layernorm\.").unwrap(), "layers.$1.ffn_norm."),
        ];
        Self { rules }
    }
}

impl Adapter for HuggingfaceAdapter {
    fn adapt(&self, mut archive: Archive) -> Result<Archive> {
        let names: Vec<String> = archive.names().map(str::to_string).collect();
        for name in names {
            for (pattern, replacement) in &self.rules {
                if pattern.is_match(&name) {
                    let renamed = pattern.replace(&name, *replacement).into_owned();
                    archive.rename(&name, renamed)?;
                    break;
                }
            }
        }
        alias_tied_output(&mut archive, "tok_embeddings.weight");
        Ok(archive)
    }
}

fn alias_tied_output(archive: &mut Archive, embedding_name: &str) {
    if archive.get("output.weight").is_some() {
        return;
    }
    if let Some(entry) = archive.get(embedding_name) {
        let alias = crate::archive::ArchiveEntry {
            dtype: entry.dtype,
            shape: entry.shape.clone(),
            container: std::sync::Arc::clone(&entry.container),
        };
        archive.insert("output.weight", alias);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huggingface_rule_renames_attention_projection() {
        let adapter = HuggingfaceAdapter::default();
        let (pattern, replacement) = &adapter.rules[3];
        assert!(pattern.is_match("model.layers.2.self_attn.q_proj.weight"));
        let renamed = pattern.replace("model.layers.2.self_attn.q_proj.weight", *replacement);
        assert_eq!(renamed, "layers.2.attention.wq.weight");
    }
}
