use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed archive header: {0}")]
    HeaderParse(String),
    #[error("no tensor named '{0}' in archive")]
    UnknownTensor(String),
    #[error("archive bind mismatch: '{name}' is {archive_dtype:?} rank {archive_rank}, expected {expected_dtype:?} rank {expected_rank}")]
    BindMismatch {
        name: String,
        archive_dtype: ferrite_tensor::Dtype,
        archive_rank: usize,
        expected_dtype: ferrite_tensor::Dtype,
        expected_rank: usize,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tensor error: {0}")]
    TensorError(#[from] ferrite_tensor::Error),
    #[error("GPU error: {0}")]
    GpuError(#[from] ferrite_gpu::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
