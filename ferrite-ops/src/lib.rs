mod error;
mod ops;
mod runtime;
mod shaders;

pub use error::{Error, Result};
pub use ops::{
    add, add2, copy, copy_into, cumsum, div, embedding, gather, greater_than, hadamard, hadamard_broadcast, matmul, multinomial,
    nucleus_sample, rmsnorm, roll, rope, rope_freqs, scalar_mul, scatter, silu, softmax, sort, sum,
};
pub use runtime::{Runtime, DEFAULT_PARTITION_CAPACITY};
pub use shaders::KernelLibrary;
