//! Loads a safetensors-style archive: parse the header, memory-map the file, partition the raw
//! tensor region into GPU buffers no larger than the driver allows, and expose each tensor as a
//! zero-copy slice of whichever partition buffer holds it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use memmap2::Mmap;
use tracing::debug;

use ferrite_gpu::Device;
use ferrite_tensor::{pin, Dtype, GpuMemoryAllocator, GpuNocopyAllocator, GpuResidentAllocator, Storage};

use crate::header::Header;
use crate::{Error, Result};

pub struct ArchiveEntry {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub container: Arc<Storage>,
}

/// A loaded set of named tensors sharing a handful of GPU-resident partition buffers.
pub struct Archive {
    entries: IndexMap<String, ArchiveEntry>,
    metadata: HashMap<String, String>,
}

impl Archive {
    /// An archive with no entries and no metadata, the starting point for merging shards.
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn extend_metadata(&mut self, metadata: HashMap<String, String>) {
        self.metadata.extend(metadata);
    }

    pub fn load(path: impl AsRef<Path>, device: &Arc<Device>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mmap = Arc::new(unsafe { Mmap::map(&file)? });
        let (header, data_start) = Header::parse(&mmap)?;

        let nocopy = GpuNocopyAllocator::new(GpuMemoryAllocator::new(Arc::clone(device)));
        let resident = GpuResidentAllocator::new(GpuMemoryAllocator::new(Arc::clone(device)), header.entries.len().max(1));
        let max_buffer_size = device.max_buffer_size() as usize;

        let mut entries = IndexMap::new();
        let mut partition_start = 0usize;
        let mut partition_entries: Vec<(&String, &crate::header::TensorEntry)> = Vec::new();
        let names: Vec<&String> = header.entries.keys().collect();
        let mut i = 0;
        while i < names.len() {
            let name = names[i];
            let entry = &header.entries[name];
            let local_end = entry.data_offsets.1;
            if !partition_entries.is_empty() && local_end - partition_start > max_buffer_size {
                flush_partition(&nocopy, &resident, &mmap, data_start, partition_start, &partition_entries, &mut entries)?;
                partition_start = entry.data_offsets.0;
                partition_entries.clear();
            }
            partition_entries.push((name, entry));
            i += 1;
        }
        if !partition_entries.is_empty() {
            flush_partition(&nocopy, &resident, &mmap, data_start, partition_start, &partition_entries, &mut entries)?;
        }

        resident.commit();
        resident.detach();
        debug!(tensors = entries.len(), "loaded archive from {}", path.display());

        Ok(Self {
            entries,
            metadata: header.metadata,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Inserts or replaces an entry, e.g. for an adapter that aliases one name to another's
    /// container.
    pub fn insert(&mut self, name: impl Into<String>, entry: ArchiveEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<()> {
        let entry = self.entries.shift_remove(from).ok_or_else(|| Error::UnknownTensor(from.to_string()))?;
        self.entries.insert(to.into(), entry);
        Ok(())
    }

    /// Re-encodes the header in insertion order and writes it and the raw tensor bytes back
    /// out. Only valid for archives whose entries are CPU-visible (a future tensor retrieved
    /// from the GPU first); aliased entries sharing a data range are written once.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut header = Header::default();
        let mut cursor = 0usize;
        let mut body = Vec::new();
        let mut written_ranges: HashMap<*const u8, (usize, usize)> = HashMap::new();
        for (name, entry) in &self.entries {
            let bytes = entry
                .container
                .raw_data()
                .ok_or_else(|| Error::HeaderParse(format!("cannot save GPU-resident tensor '{name}' without a prior readback")))?;
            let key = bytes.as_ptr();
            let range = if let Some(&range) = written_ranges.get(&key) {
                range
            } else {
                let start = cursor;
                body.extend_from_slice(bytes);
                cursor += bytes.len();
                let range = (start, cursor);
                written_ranges.insert(key, range);
                range
            };
            header.entries.insert(
                name.clone(),
                crate::header::TensorEntry {
                    dtype: entry.dtype,
                    shape: entry.shape.clone(),
                    data_offsets: range,
                },
            );
        }
        header.metadata = self.metadata.clone();
        let mut out = header.encode()?;
        out.extend_from_slice(&body);
        std::fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_gpu::Accelerator;

    fn write_sample_archive(path: &Path) {
        let json = serde_json::json!({
            "__metadata__": {"format": "ferrite"},
            "weight": {"dtype": "F32", "shape": [2, 2], "data_offsets": [0, 16]},
        });
        let encoded = serde_json::to_vec(&json).unwrap();
        let mut bytes = (encoded.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(&encoded);
        bytes.extend_from_slice(bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]));
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn load_exposes_entries_and_metadata() {
        let device = Arc::new(Accelerator::default_device().await.expect("no compatible GPU adapter for test"));
        let dir = std::env::temp_dir().join(format!("ferrite-archive-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.safetensors");
        write_sample_archive(&path);

        let archive = Archive::load(&path, &device).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.metadata().get("format").map(String::as_str), Some("ferrite"));
        let entry = archive.get("weight").unwrap();
        assert_eq!(entry.shape, vec![2, 2]);
        assert_eq!(entry.dtype, Dtype::F32);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rename_moves_entry_under_new_key() {
        let mut archive = Archive::empty();
        archive.insert(
            "old.name",
            ArchiveEntry {
                dtype: Dtype::F32,
                shape: vec![1],
                container: Arc::new(Storage::random(4)),
            },
        );
        archive.rename("old.name", "new.name").unwrap();
        assert!(archive.get("old.name").is_none());
        assert!(archive.get("new.name").is_some());
    }
}

fn flush_partition(
    nocopy: &GpuNocopyAllocator,
    resident: &GpuResidentAllocator,
    mmap: &Arc<Mmap>,
    data_start: usize,
    partition_start: usize,
    partition_entries: &[(&String, &crate::header::TensorEntry)],
    out: &mut IndexMap<String, ArchiveEntry>,
) -> Result<()> {
    let partition_end = partition_entries.iter().map(|(_, e)| e.data_offsets.1).max().unwrap_or(partition_start);
    let file_start = data_start + partition_start;
    let file_end = data_start + partition_end;
    let chunk = &mmap[file_start..file_end];
    let storage = nocopy.allocate_pinned(chunk, pin(Arc::clone(mmap)))?;
    resident.adopt(&storage)?;
    let storage = Arc::new(storage);
    for (name, entry) in partition_entries {
        let local_offset = entry.data_offsets.0 - partition_start;
        let len = entry.data_offsets.1 - entry.data_offsets.0;
        let container = Arc::new(storage.slice(local_offset, len)?);
        out.insert(
            (*name).clone(),
            ArchiveEntry {
                dtype: entry.dtype,
                shape: entry.shape.clone(),
                container,
            },
        );
    }
    Ok(())
}
