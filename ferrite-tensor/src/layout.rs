//! Packed sizes/strides/offsets block written verbatim into a kernel's argument table. The
//! shader reads this struct to recover the logical shape of a tensor argument independent of
//! the byte buffer bound alongside it; only this host-side shape is specified, the shader body
//! that consumes it is out of scope.

/// Tensor views of rank higher than this are rejected at construction. Chosen to comfortably
/// cover the runtime's actual maximum (4, for the KV cache's `(batch, seq, head, dim)`), with
/// headroom for a flattened batch dimension inserted by `matmul`'s rank-3 normalization.
pub const MAX_RANK: usize = 8;

/// A runtime-rank sizes/strides/offsets block, padded to `MAX_RANK` so it has a fixed byte
/// size regardless of the tensor's actual rank. `rank` tells the shader how many of the
/// leading entries are meaningful.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Layout {
    pub rank: u32,
    pub _pad: u32,
    pub sizes: [u32; MAX_RANK],
    pub strides: [u32; MAX_RANK],
    pub offsets: [u32; MAX_RANK],
}

impl Layout {
    pub fn new(sizes: &[usize], strides: &[usize], offsets: &[usize]) -> Self {
        assert_eq!(sizes.len(), strides.len());
        assert_eq!(sizes.len(), offsets.len());
        assert!(sizes.len() <= MAX_RANK, "rank {} exceeds MAX_RANK {}", sizes.len(), MAX_RANK);
        let mut packed = Layout {
            rank: sizes.len() as u32,
            _pad: 0,
            sizes: [0; MAX_RANK],
            strides: [0; MAX_RANK],
            offsets: [0; MAX_RANK],
        };
        for (i, (&size, (&stride, &offset))) in sizes.iter().zip(strides.iter().zip(offsets.iter())).enumerate() {
            packed.sizes[i] = size as u32;
            packed.strides[i] = stride as u32;
            packed.offsets[i] = offset as u32;
        }
        packed
    }

    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes[..self.rank()]
    }
}
