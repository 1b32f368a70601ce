use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("graph error: {0}")]
    GraphError(#[from] ferrite_graph::Error),
    #[error("ops error: {0}")]
    OpsError(#[from] ferrite_ops::Error),
    #[error("tensor error: {0}")]
    TensorError(#[from] ferrite_tensor::Error),
    #[error("archive error: {0}")]
    ArchiveError(#[from] ferrite_archive::Error),
    #[error("config error: {0}")]
    ConfigError(#[from] serde_json::Error),
    #[error("linear '{0}' has neither a dense weight nor a quantized representation bound")]
    UnboundLinear(String),
}

pub type Result<T> = std::result::Result<T, self::Error>;
