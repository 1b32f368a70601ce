use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU runtime error: {0}")]
    ComputeError(#[from] anyhow::Error),
    #[error("no suitable adapter found")]
    CreateAdapterError,
    #[error("cannot create device: {0}")]
    RequestDeviceError(#[from] wgpu::RequestDeviceError),
    #[error("command buffer failed: {0}")]
    GpuRuntimeError(String),
    #[error("bind group '{label}' needs {requested} storage bindings, device allows {max}")]
    TooManyBindings { label: String, requested: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, self::Error>;
