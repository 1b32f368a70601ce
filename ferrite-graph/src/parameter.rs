//! A parameter is a named tensor slot inside the layer tree: dtype and shape are known up
//! front (from the options file), the backing storage arrives later from an archive. Keeping
//! parameters type-erased here lets a `BasicLayer` hold a single homogeneous table even
//! though individual parameters are `f32` weights, `i8` quantized weights, or `f32` scales.

use std::sync::Arc;

use ferrite_tensor::{Dtype, ElementType, Storage, TensorView};

use crate::{Error, Result};

/// A named slot in the parameter table. Starts unbound (`container: None`) and is filled in
/// by `set_parameter` once an archive entry is resolved against it.
#[derive(Clone)]
pub struct Parameter {
    dtype: Dtype,
    shape: Vec<usize>,
    container: Option<Arc<Storage>>,
}

impl Parameter {
    /// Declares a parameter of the given dtype and shape, unbound until `bind` is called.
    pub fn declare(dtype: Dtype, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            container: None,
        }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn is_bound(&self) -> bool {
        self.container.is_some()
    }

    /// Moves a resolved storage and shape into this slot. `path` is only used to name the
    /// mismatch error.
    pub fn bind(&mut self, path: &str, dtype: Dtype, shape: Vec<usize>, container: Arc<Storage>) -> Result<()> {
        if dtype != self.dtype || shape.len() != self.shape.len() {
            return Err(Error::ParameterTypeMismatch {
                path: path.to_string(),
                expected_dtype: self.dtype,
                expected_rank: self.shape.len(),
                actual_dtype: dtype,
                actual_rank: shape.len(),
            });
        }
        self.shape = shape;
        self.container = Some(container);
        Ok(())
    }

    /// Returns a typed view over the bound storage, failing if unbound or if `T`'s dtype
    /// doesn't match the declared one.
    pub fn view<T: ElementType>(&self, path: &str) -> Result<TensorView<T>> {
        let container = self.container.clone().ok_or_else(|| Error::ParameterNotRegistered(path.to_string()))?;
        if T::DTYPE != self.dtype {
            return Err(Error::ParameterTypeMismatch {
                path: path.to_string(),
                expected_dtype: self.dtype,
                expected_rank: self.shape.len(),
                actual_dtype: T::DTYPE,
                actual_rank: self.shape.len(),
            });
        }
        Ok(TensorView::new(self.shape.clone(), container)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_dtype_mismatch() {
        let mut param = Parameter::declare(Dtype::F32, vec![4]);
        let storage = Arc::new(Storage::random(16));
        let err = param.bind("w", Dtype::I32, vec![4], storage).unwrap_err();
        assert!(matches!(err, Error::ParameterTypeMismatch { .. }));
    }

    #[test]
    fn bind_then_view_round_trips_shape() {
        let mut param = Parameter::declare(Dtype::F32, vec![2, 2]);
        let storage = Arc::new(Storage::random(16));
        param.bind("w", Dtype::F32, vec![2, 2], storage).unwrap();
        let view = param.view::<f32>("w").unwrap();
        assert_eq!(view.sizes(), &[2, 2]);
    }
}
