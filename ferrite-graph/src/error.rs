use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no parameter registered at path '{0}'")]
    ParameterNotRegistered(String),
    #[error("no child named '{0}' in layer")]
    ChildNotFound(String),
    #[error("parameter '{path}' expected {expected_dtype:?} rank {expected_rank}, got {actual_dtype:?} rank {actual_rank}")]
    ParameterTypeMismatch {
        path: String,
        expected_dtype: ferrite_tensor::Dtype,
        expected_rank: usize,
        actual_dtype: ferrite_tensor::Dtype,
        actual_rank: usize,
    },
    #[error("tensor error: {0}")]
    TensorError(#[from] ferrite_tensor::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
