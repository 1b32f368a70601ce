//! Sharded checkpoints split tensors across several archive files, indexed by a
//! `model.safetensors.index.json`-style weight map: `{"weight_map": {tensor_name: filename}}`.
//! `ShardedArchive::load` opens each referenced shard lazily, once, and merges their entries
//! into a single `Archive` in weight-map order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use ferrite_gpu::Device;

use crate::archive::Archive;
use crate::Result;

#[derive(Debug, Deserialize)]
struct WeightMapIndex {
    weight_map: HashMap<String, String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Loads a sharded checkpoint from its index file, merging every referenced shard into one
/// `Archive`. Each shard file is memory-mapped at most once even if it holds many tensors.
pub fn load_sharded(index_path: impl AsRef<Path>, device: &Arc<Device>) -> Result<Archive> {
    let index_path = index_path.as_ref();
    let index_bytes = std::fs::read(index_path)?;
    let index: WeightMapIndex = serde_json::from_slice(&index_bytes)?;
    let base_dir = index_path.parent().unwrap_or_else(|| Path::new("."));

    let mut shard_names: Vec<&String> = index.weight_map.values().collect();
    shard_names.sort();
    shard_names.dedup();

    let mut shards = HashMap::new();
    for shard_name in shard_names {
        let shard = Archive::load(base_dir.join(shard_name), device)?;
        shards.insert(shard_name.clone(), shard);
    }

    let mut merged = Archive::empty();
    for (tensor_name, shard_name) in &index.weight_map {
        let shard = shards
            .get(shard_name)
            .ok_or_else(|| crate::Error::UnknownTensor(format!("shard '{shard_name}' referenced but not loaded")))?;
        let entry = shard
            .get(tensor_name)
            .ok_or_else(|| crate::Error::UnknownTensor(format!("'{tensor_name}' missing from shard '{shard_name}'")))?;
        merged.insert(
            tensor_name.clone(),
            crate::archive::ArchiveEntry {
                dtype: entry.dtype,
                shape: entry.shape.clone(),
                container: Arc::clone(&entry.container),
            },
        );
    }
    merged.extend_metadata(index.metadata);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_map_index_parses() {
        let json = serde_json::json!({
            "metadata": {"total_size": "123"},
            "weight_map": {
                "tok_embeddings.weight": "model-00001-of-00002.safetensors",
                "output.weight": "model-00002-of-00002.safetensors",
            },
        });
        let index: WeightMapIndex = serde_json::from_value(json).unwrap();
        assert_eq!(index.weight_map.len(), 2);
        assert_eq!(index.metadata.get("total_size").map(String::as_str), Some("123"));
    }
}
