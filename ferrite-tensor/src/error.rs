use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("non-contiguous view: cannot reshape {from:?} to {to:?}")]
    NonContiguousView { from: Vec<usize>, to: Vec<usize> },
    #[error("allocator error: {0}")]
    AllocError(String),
    #[error("residency set capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },
    #[error("GPU error: {0}")]
    GpuError(#[from] ferrite_gpu::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
