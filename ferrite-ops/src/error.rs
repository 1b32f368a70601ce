use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("kernel error: {0}")]
    KernelError(#[from] ferrite_kernel::Error),
    #[error("tensor error: {0}")]
    TensorError(#[from] ferrite_tensor::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
