//! The archive wire format: an 8-byte little-endian header length, then that many bytes of
//! UTF-8 JSON describing each tensor's dtype/shape/byte range, then the raw tensor bytes
//! themselves. A reserved `__metadata__` key carries an opaque string map alongside the
//! tensor entries.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use ferrite_tensor::Dtype;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

#[derive(Debug, Clone)]
pub struct TensorEntry {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data_offsets: (usize, usize),
}

/// The parsed header: tensor entries in file order, plus the metadata map. `entries` is an
/// `IndexMap` so a later save can re-emit tensors in the order they were first seen.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub entries: IndexMap<String, TensorEntry>,
    pub metadata: HashMap<String, String>,
}

impl Header {
    /// Parses the header out of `bytes` (the whole file, or at least its prefix), returning
    /// the header and the byte offset at which tensor data begins.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 8 {
            return Err(Error::HeaderParse("file shorter than the 8-byte length prefix".into()));
        }
        let header_len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let json_start = 8;
        let json_end = json_start + header_len;
        if bytes.len() < json_end {
            return Err(Error::HeaderParse(format!(
                "declared header length {header_len} exceeds file size {}",
                bytes.len()
            )));
        }
        let raw: IndexMap<String, serde_json::Value> = serde_json::from_slice(&bytes[json_start..json_end])?;
        let mut entries = IndexMap::new();
        let mut metadata = HashMap::new();
        for (name, value) in raw {
            if name == "__metadata__" {
                let map: HashMap<String, String> = serde_json::from_value(value)?;
                metadata = map;
                continue;
            }
            let raw_entry: RawEntry = serde_json::from_value(value)?;
            let dtype = Dtype::from_name(&raw_entry.dtype).ok_or_else(|| Error::HeaderParse(format!("unknown dtype '{}'", raw_entry.dtype)))?;
            entries.insert(
                name,
                TensorEntry {
                    dtype,
                    shape: raw_entry.shape,
                    data_offsets: (raw_entry.data_offsets[0], raw_entry.data_offsets[1]),
                },
            );
        }
        entries.sort_by(|_, a, _, b| a.data_offsets.0.cmp(&b.data_offsets.0));
        Ok((Self { entries, metadata }, json_end))
    }

    /// Re-encodes the header in the entries' current insertion order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut raw: IndexMap<String, serde_json::Value> = IndexMap::new();
        if !self.metadata.is_empty() {
            raw.insert("__metadata__".to_string(), serde_json::to_value(&self.metadata)?);
        }
        for (name, entry) in &self.entries {
            let raw_entry = RawEntry {
                dtype: entry.dtype.name().to_string(),
                shape: entry.shape.clone(),
                data_offsets: [entry.data_offsets.0, entry.data_offsets.1],
            };
            raw.insert(name.clone(), serde_json::to_value(raw_entry)?);
        }
        let json = serde_json::to_vec(&raw)?;
        let mut out = Vec::with_capacity(8 + json.len());
        out.extend_from_slice(&(json.len() as u64).to_le_bytes());
        out.extend_from_slice(&json);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_bytes() -> Vec<u8> {
        let json = serde_json::json!({
            "__metadata__": {"format": "ferrite"},
            "weight": {"dtype": "F32", "shape": [2, 2], "data_offsets": [0, 16]},
        });
        let encoded = serde_json::to_vec(&json).unwrap();
        let mut bytes = (encoded.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(&encoded);
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    #[test]
    fn parses_header_and_metadata() {
        let bytes = sample_bytes();
        let (header, data_start) = Header::parse(&bytes).unwrap();
        assert_eq!(header.metadata.get("format").map(String::as_str), Some("ferrite"));
        let entry = &header.entries["weight"];
        assert_eq!(entry.shape, vec![2, 2]);
        assert_eq!(entry.dtype, Dtype::F32);
        assert_eq!(data_start, bytes.len() - 16);
    }

    #[test]
    fn rejects_truncated_file() {
        assert!(Header::parse(&[1, 0, 0, 0]).is_err());
    }

    #[test]
    fn encode_round_trips_entries() {
        let (header, _) = Header::parse(&sample_bytes()).unwrap();
        let re_encoded = header.encode().unwrap();
        let (reparsed, _) = Header::parse(&re_encoded).unwrap();
        assert_eq!(reparsed.entries["weight"].shape, header.entries["weight"].shape);
    }
}
