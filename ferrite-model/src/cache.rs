//! Attention-sink KV cache: keeps the first `sink_len` positions pinned forever and treats
//! everything after them as a sliding window. Writes land at the next free slot while the
//! window has room; once it fills, the window (not the sink) rolls left to make room and the
//! sink prefix is recopied verbatim into the rolled-over buffer.

use std::sync::Arc;

use ferrite_kernel::{FutureTensor, ThreadSignal};
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::TensorView;

use crate::Result;

pub struct SinkCache {
    keys: TensorView<f32>,
    values: TensorView<f32>,
    capacity: usize,
    sink_len: usize,
    /// Number of physically valid slots at the front of `keys`/`values`.
    pos: usize,
    /// Logical sequence length ever written, used as the RoPE offset for the next chunk.
    total_written: usize,
}

impl SinkCache {
    pub fn new(rt: &Runtime, batch: usize, n_kv_heads: usize, head_dim: usize, max_seq_len: usize, sink_len: usize) -> Result<Self> {
        let sizes = vec![batch, max_seq_len, n_kv_heads, head_dim];
        let keys = rt.alloc_output::<f32>(sizes.clone())?;
        let values = rt.alloc_output::<f32>(sizes)?;
        Ok(Self { keys, values, capacity: max_seq_len, sink_len: sink_len.min(max_seq_len), pos: 0, total_written: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// RoPE start position for the chunk about to be written.
    pub fn next_rope_pos(&self) -> usize {
        self.total_written
    }

    /// Appends `keys_new`/`values_new` (each `(batch, L, n_kv_heads, head_dim)`), rolling the
    /// window forward if the cache is full, and returns views over every valid cached position
    /// together with the RoPE start position the caller used for this chunk.
    pub fn write(&mut self, rt: &Runtime, keys_new: &TensorView<f32>, values_new: &TensorView<f32>) -> Result<(TensorView<f32>, TensorView<f32>, usize)> {
        let rope_pos = self.total_written;
        let chunk_len = keys_new.sizes()[1];
        if self.pos + chunk_len > self.capacity {
            self.roll(rt, chunk_len)?;
        }
        let dst_keys = self.keys.narrow(1, self.pos, chunk_len)?;
        ops::copy_into(rt, dst_keys, keys_new)?;
        let dst_values = self.values.narrow(1, self.pos, chunk_len)?;
        ops::copy_into(rt, dst_values, values_new)?;
        rt.flush();
        self.pos += chunk_len;
        self.total_written += chunk_len;

        let valid_keys = self.keys.narrow(1, 0, self.pos)?;
        let valid_values = self.values.narrow(1, 0, self.pos)?;
        Ok((valid_keys, valid_values, rope_pos))
    }

    /// Evicts `chunk_len` of the oldest window entries by replacing the cache with a fresh
    /// buffer: the sink prefix is copied verbatim, the window is rolled left by `chunk_len`
    /// (dropping the oldest window entries off the front), and `pos` is pulled back to the
    /// first free slot that leaves.
    fn roll(&mut self, rt: &Runtime, chunk_len: usize) -> Result<()> {
        let sizes = self.keys.sizes().to_vec();
        let new_keys = rt.alloc_output::<f32>(sizes.clone())?;
        let new_values = rt.alloc_output::<f32>(sizes)?;

        let sink_src_k = self.keys.narrow(1, 0, self.sink_len)?;
        let sink_dst_k = new_keys.narrow(1, 0, self.sink_len)?;
        ops::copy_into(rt, sink_dst_k, &sink_src_k)?;
        let sink_src_v = self.values.narrow(1, 0, self.sink_len)?;
        let sink_dst_v = new_values.narrow(1, 0, self.sink_len)?;
        ops::copy_into(rt, sink_dst_v, &sink_src_v)?;

        let window_len = self.capacity - self.sink_len;
        let window_src_k = self.keys.narrow(1, self.sink_len, window_len)?;
        let window_src_v = self.values.narrow(1, self.sink_len, window_len)?;
        let rolled_k = ops::roll::<f32>(rt, &window_src_k, -(chunk_len as i64), 1)?;
        let rolled_v = ops::roll::<f32>(rt, &window_src_v, -(chunk_len as i64), 1)?;
        rt.flush();
        let device = rt.device();
        let window_dst_k = new_keys.narrow(1, self.sink_len, window_len)?;
        ops::copy_into(rt, window_dst_k, rolled_k.get(device))?;
        let window_dst_v = new_values.narrow(1, self.sink_len, window_len)?;
        ops::copy_into(rt, window_dst_v, rolled_v.get(device))?;
        rt.flush();

        self.keys = new_keys;
        self.values = new_values;
        self.pos = self.capacity - chunk_len;
        Ok(())
    }
}

/// An additive `(batch, n_heads, query_len, key_len)` mask with `-inf` above the causal
/// diagonal (offset by `key_len - query_len`, since cached keys may outnumber fresh queries).
/// Decode steps (`query_len == 1`) never need masking since a single query is always allowed
/// to attend to everything already in the cache.
pub fn causal_mask(rt: &Runtime, batch: usize, n_heads: usize, query_len: usize, key_len: usize) -> Result<Option<FutureTensor<f32>>> {
    if query_len <= 1 {
        return Ok(None);
    }
    let offset = key_len - query_len;
    let mut row = vec![0f32; query_len * key_len];
    for i in 0..query_len {
        for j in 0..key_len {
            if j > offset + i {
                row[i * key_len + j] = f32::NEG_INFINITY;
            }
        }
    }
    let mut flat = Vec::with_capacity(batch * n_heads * row.len());
    for _ in 0..(batch * n_heads) {
        flat.extend_from_slice(&row);
    }
    let storage = rt.allocator().allocate_from(bytemuck::cast_slice(&flat))?;
    let view = TensorView::new(vec![batch, n_heads, query_len, key_len], Arc::new(storage))?;
    Ok(Some(FutureTensor::new(view, ThreadSignal::ready())))
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

    /// Fills a `(1, positions, n_kv_heads, head_dim)` chunk so every position's row is a
    /// distinct, internally-ordered pair of values (`10*p`, `10*p + 1`, ...) rather than a
    /// single repeated scalar — a roll that scrambles content across heads/dims shows up as
    /// values landing in the wrong row or a row's own values getting split apart.
    fn positions(rt: &Runtime, n_positions: usize, n_kv_heads: usize, head_dim: usize) -> TensorView<f32> {
        let inner = n_kv_heads * head_dim;
        let mut data = Vec::with_capacity(n_positions * inner);
        for p in 0..n_positions {
            for d in 0..inner {
                data.push((10 * p + d) as f32);
            }
        }
        let storage = rt.allocator().allocate_from(bytemuck::cast_slice(&data)).unwrap();
        TensorView::new(vec![1, n_positions, n_kv_heads, head_dim], Arc::new(storage)).unwrap()
    }

    #[tokio::test]
    async fn write_within_capacity_grows_the_valid_window() {
        let rt = runtime().await;
        let mut cache = SinkCache::new(&rt, 1, 2, 4, 8, 2).unwrap();
        let k = filled(&rt, vec![1, 3, 2, 4], 1.0);
        let v = filled(&rt, vec![1, 3, 2, 4], 2.0);
        let (valid_k, _valid_v, rope_pos) = cache.write(&rt, &k, &v).unwrap();
        assert_eq!(rope_pos, 0);
        assert_eq!(valid_k.sizes(), &[1, 3, 2, 4]);
        assert_eq!(cache.next_rope_pos(), 3);
    }

    #[tokio::test]
    async fn overflow_rolls_the_window_and_keeps_the_sink() {
        let rt = runtime().await;
        let mut cache = SinkCache::new(&rt, 1, 1, 2, 4, 1).unwrap();
        let first = filled(&rt, vec![1, 4, 1, 2], 1.0);
        let first_v = filled(&rt, vec![1, 4, 1, 2], 1.0);
        let (_, _, _) = cache.write(&rt, &first, &first_v).unwrap();
        assert_eq!(cache.pos, 4);

        let second = filled(&rt, vec![1, 1, 1, 2], 9.0);
        let second_v = filled(&rt, vec![1, 1, 1, 2], 9.0);
        let (valid_k, _valid_v, rope_pos) = cache.write(&rt, &second, &second_v).unwrap();
        assert_eq!(rope_pos, 4);
        assert_eq!(valid_k.sizes(), &[1, 4, 1, 2]);
        assert_eq!(cache.pos, 4);
    }

    #[tokio::test]
    async fn overflow_roll_preserves_each_row_without_scrambling_across_heads_and_dims() {
        // n_kv_heads * head_dim == 2 here, so a roll that shifts by flat element count instead
        // of by whole (n_kv_heads, head_dim) rows would split a row's own values apart.
        let rt = runtime().await;
        let mut cache = SinkCache::new(&rt, 1, 1, 2, 4, 1).unwrap();

        let first = positions(&rt, 4, 1, 2);
        let (_, _, _) = cache.write(&rt, &first, &first).unwrap();
        assert_eq!(cache.pos, 4);

        let new_data = [90.0f32, 91.0];
        let storage = rt.allocator().allocate_from(bytemuck::cast_slice(&new_data)).unwrap();
        let second = TensorView::new(vec![1, 1, 1, 2], Arc::new(storage)).unwrap();
        let (valid_k, _valid_v, _) = cache.write(&rt, &second, &second).unwrap();

        let device = rt.device();
        let values = FutureTensor::new(valid_k, ThreadSignal::ready()).retrieve(device).await.unwrap();

        // Sink (position 0) is untouched; the window rolls left by the one evicted chunk, and
        // every row keeps its own two values adjacent and in order.
        assert_eq!(values, vec![0.0, 1.0, 30.0, 31.0, 10.0, 11.0, 90.0, 91.0]);
    }

    #[tokio::test]
    async fn causal_mask_is_none_for_single_token_decode() {
        let rt = runtime().await;
        assert!(causal_mask(&rt, 1, 1, 1, 5).unwrap().is_none());
    }

    #[tokio::test]
    async fn causal_mask_blocks_future_positions() {
        let rt = runtime().await;
        let mask = causal_mask(&rt, 1, 1, 2, 2).unwrap().unwrap();
        let values = mask.retrieve(rt.device()).await.unwrap();
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], f32::NEG_INFINITY);
        assert_eq!(values[2], 0.0);
        assert_eq!(values[3], 0.0);
    }
}
