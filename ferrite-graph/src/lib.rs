//! The layer graph: a tree of named parameter slots and named children, with breadth-first
//! application and dot-path binding. `ferrite-model` builds the transformer's module tree out
//! of these primitives; this crate knows nothing about attention or RoPE, only about trees
//! of named tensors.

mod array;
mod error;
mod indirect;
mod layer;
mod parameter;

pub use array::LayerArray;
pub use error::{Error, Result};
pub use indirect::IndirectLayer;
pub use layer::{apply, get_parameter, set_parameter, BasicLayer, Layer};
pub use parameter::Parameter;
