use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid grid: threadgroup {group:?} exceeds device limit {max_threads_per_group} or grid {grid:?} is smaller than its threadgroup")]
    InvalidGrid { grid: (u32, u32, u32), group: (u32, u32, u32), max_threads_per_group: u32 },
    #[error("kernel task already invoked")]
    AlreadyInvoked,
    #[error("kernel thread is not joinable (committed or at capacity)")]
    ThreadNotJoinable,
    #[error("malformed kernel name: {0}")]
    MalformedKernelName(String),
    #[error("GPU runtime error: {0}")]
    GpuRuntimeError(String),
    #[error("tensor error: {0}")]
    TensorError(#[from] ferrite_tensor::Error),
    #[error("GPU error: {0}")]
    GpuError(#[from] ferrite_gpu::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
