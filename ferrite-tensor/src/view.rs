//! The tensor view: an immutable sizes/strides/offsets descriptor over a shared `Storage`.
//! Views alias their storage by reference count; `narrow`, `transpose`, and `view` itself
//! never copy bytes, only rebuild the descriptor.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::layout::Layout;
use crate::storage::Storage;
use crate::types::ElementType;
use crate::{Error, Result};

/// A typed, shaped view over a shared `Storage`.
pub struct TensorView<T: ElementType> {
    sizes: Vec<usize>,
    strides: Vec<usize>,
    offsets: Vec<usize>,
    container: Arc<Storage>,
    phantom: PhantomData<T>,
}

impl<T: ElementType> Clone for TensorView<T> {
    fn clone(&self) -> Self {
        Self {
            sizes: self.sizes.clone(),
            strides: self.strides.clone(),
            offsets: self.offsets.clone(),
            container: Arc::clone(&self.container),
            phantom: PhantomData,
        }
    }
}

fn row_major_strides(sizes: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; sizes.len()];
    for i in (0..sizes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * sizes[i + 1];
    }
    strides
}

impl<T: ElementType> TensorView<T> {
    /// Wraps a freshly allocated container with row-major strides and zero offsets.
    pub fn new(sizes: Vec<usize>, container: Arc<Storage>) -> Result<Self> {
        if sizes.iter().any(|&s| s == 0) {
            return Err(Error::InvalidArgument("tensor sizes must be positive".into()));
        }
        let numel: usize = sizes.iter().product();
        let needed = numel * std::mem::size_of::<T>();
        if container.byte_size() < needed {
            return Err(Error::InvalidArgument(format!(
                "container holds {} bytes, tensor of shape {:?} needs {}",
                container.byte_size(),
                sizes,
                needed
            )));
        }
        let strides = row_major_strides(&sizes);
        let offsets = vec![0usize; sizes.len()];
        Ok(Self {
            sizes,
            strides,
            offsets,
            container,
            phantom: PhantomData,
        })
    }

    /// Builds a view directly from explicit sizes/strides/offsets, bypassing the row-major
    /// constraint. Used internally by `narrow`/`transpose`/`view` and by kernel wrappers that
    /// hand back a pre-shaped result (e.g. `sort`'s descending-order output).
    pub fn from_parts(sizes: Vec<usize>, strides: Vec<usize>, offsets: Vec<usize>, container: Arc<Storage>) -> Result<Self> {
        if sizes.len() != strides.len() || sizes.len() != offsets.len() {
            return Err(Error::InvalidArgument("sizes/strides/offsets must share a rank".into()));
        }
        let view = Self {
            sizes,
            strides,
            offsets,
            container,
            phantom: PhantomData,
        };
        view.check_bounds()?;
        Ok(view)
    }

    fn check_bounds(&self) -> Result<()> {
        let usable = self.container.byte_size() / std::mem::size_of::<T>();
        let mut extent = 0usize;
        for i in 0..self.sizes.len() {
            if self.sizes[i] == 0 {
                return Err(Error::InvalidArgument("tensor sizes must be positive".into()));
            }
            let reach = self.strides[i] * (self.sizes[i] - 1) + self.offsets[i];
            extent = extent.max(reach);
        }
        if extent >= usable && usable > 0 {
            return Err(Error::InvalidArgument(format!(
                "view reaches element {extent} but container only has {usable} elements"
            )));
        }
        Ok(())
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn numel(&self) -> usize {
        self.sizes.iter().product()
    }

    pub fn container(&self) -> &Arc<Storage> {
        &self.container
    }

    /// Whether the view's logical element order matches its row-major byte layout exactly
    /// (no narrowing, no transposition, no aliasing offset).
    pub fn is_contiguous(&self) -> bool {
        self.strides == row_major_strides(&self.sizes) && self.offsets.iter().all(|&o| o == 0)
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.sizes, &self.strides, &self.offsets)
    }

    /// Reshapes the view. Succeeds only if the row-major walk implied by `new_shape` matches
    /// a legal walk over the tensor's current strides — i.e. the view must already be
    /// contiguous in the portion it touches. At most one entry may be `-1` (deduced from the
    /// remaining element count).
    pub fn view(&self, new_shape: &[isize]) -> Result<Self> {
        if !self.is_contiguous() {
            return Err(Error::NonContiguousView {
                from: self.sizes.clone(),
                to: new_shape.iter().map(|&d| d.max(0) as usize).collect(),
            });
        }
        let deduced_count = new_shape.iter().filter(|&&d| d == -1).count();
        if deduced_count > 1 {
            return Err(Error::InvalidArgument("at most one dimension may be -1 in view()".into()));
        }
        let known_product: isize = new_shape.iter().filter(|&&d| d != -1).product();
        let numel = self.numel() as isize;
        let mut sizes = Vec::with_capacity(new_shape.len());
        for &d in new_shape {
            if d == -1 {
                if known_product == 0 || numel % known_product != 0 {
                    return Err(Error::NonContiguousView {
                        from: self.sizes.clone(),
                        to: new_shape.iter().map(|&d| d.max(0) as usize).collect(),
                    });
                }
                sizes.push((numel / known_product) as usize);
            } else {
                sizes.push(d as usize);
            }
        }
        let new_numel: usize = sizes.iter().product();
        if new_numel != self.numel() {
            return Err(Error::NonContiguousView {
                from: self.sizes.clone(),
                to: sizes,
            });
        }
        TensorView::new(sizes, Arc::clone(&self.container))
    }

    /// Narrows dimension `dim` to `[start, start+length)`. Adds `start * stride[dim]` to the
    /// offset and shrinks the size; never copies.
    pub fn narrow(&self, dim: usize, start: usize, length: usize) -> Result<Self> {
        if dim >= self.rank() {
            return Err(Error::InvalidArgument(format!("dim {dim} out of range for rank {}", self.rank())));
        }
        if start + length > self.sizes[dim] {
            return Err(Error::InvalidArgument(format!(
                "narrow({dim}, {start}, {length}) exceeds size {}",
                self.sizes[dim]
            )));
        }
        let mut sizes = self.sizes.clone();
        let mut offsets = self.offsets.clone();
        sizes[dim] = length;
        offsets[dim] += start * self.strides[dim];
        Self::from_parts(sizes, self.strides.clone(), offsets, Arc::clone(&self.container))
    }

    /// Permutes sizes/strides/offsets according to `perm`. Never copies.
    pub fn transpose(&self, perm: &[usize]) -> Result<Self> {
        if perm.len() != self.rank() {
            return Err(Error::InvalidArgument("permutation length must equal rank".into()));
        }
        let mut seen = vec![false; perm.len()];
        for &p in perm {
            if p >= perm.len() || seen[p] {
                return Err(Error::InvalidArgument("permutation must be a bijection on 0..rank".into()));
            }
            seen[p] = true;
        }
        let sizes = perm.iter().map(|&p| self.sizes[p]).collect();
        let strides = perm.iter().map(|&p| self.strides[p]).collect();
        let offsets = perm.iter().map(|&p| self.offsets[p]).collect();
        Self::from_parts(sizes, strides, offsets, Arc::clone(&self.container))
    }

    /// Returns a contiguous rank-1 view flattening all dimensions, failing if the view is not
    /// already contiguous. Several kernels (`roll`, `copy`) normalize to this shape.
    pub fn flatten_contiguous(&self) -> Result<Self> {
        self.view(&[self.numel() as isize])
    }

    pub fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    /// Reads the tensor's bytes as a typed slice, for CPU-visible storage only. GPU-backed
    /// tensors must go through a future tensor's readout instead.
    pub fn as_slice(&self) -> Option<&[T]> {
        if !self.is_contiguous() {
            return None;
        }
        let bytes = self.container.raw_data()?;
        Some(bytemuck::cast_slice(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tensor_f32(sizes: Vec<usize>) -> TensorView<f32> {
        let numel: usize = sizes.iter().product();
        let storage = Arc::new(Storage::random(numel * 4));
        TensorView::new(sizes, storage).unwrap()
    }

    #[test]
    fn view_identity_preserves_layout() {
        let t = tensor_f32(vec![2, 3, 4]);
        let shape: Vec<isize> = t.sizes().iter().map(|&s| s as isize).collect();
        let reshaped = t.view(&shape).unwrap();
        assert_eq!(reshaped.sizes(), t.sizes());
        assert_eq!(reshaped.strides(), t.strides());
        assert!(Arc::ptr_eq(reshaped.container(), t.container()));
    }

    #[test]
    fn narrow_numel() {
        let t = tensor_f32(vec![4, 5, 6]);
        let n = t.narrow(1, 1, 3).unwrap();
        assert_eq!(n.numel(), 3 * 4 * 6);
    }

    #[test]
    fn transpose_roundtrip() {
        let t = tensor_f32(vec![2, 3, 4]);
        let perm = [2, 0, 1];
        let inverse = [1, 2, 0];
        let back = t.transpose(&perm).unwrap().transpose(&inverse).unwrap();
        assert_eq!(back.sizes(), t.sizes());
        assert_eq!(back.strides(), t.strides());
        assert_eq!(back.offsets(), t.offsets());
    }

    #[test]
    fn view_deduces_single_dim() {
        let t = tensor_f32(vec![2, 3, 4]);
        let r = t.view(&[2, -1]).unwrap();
        assert_eq!(r.sizes(), &[2, 12]);
    }

    #[test]
    fn view_rejects_multiple_deduced_dims() {
        let t = tensor_f32(vec![2, 3, 4]);
        assert!(t.view(&[-1, -1]).is_err());
    }

    #[test]
    fn non_contiguous_view_fails() {
        let t = tensor_f32(vec![4, 5]);
        let narrowed = t.narrow(1, 1, 3).unwrap();
        assert!(narrowed.view(&[12]).is_err());
    }
}
