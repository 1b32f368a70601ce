use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model error: {0}")]
    Model(#[from] ferrite_model::Error),
    #[error("ops error: {0}")]
    Ops(#[from] ferrite_ops::Error),
    #[error("kernel error: {0}")]
    Kernel(#[from] ferrite_kernel::Error),
    #[error("malformed template: {0}")]
    MalformedTemplate(String),
    #[error("undeclared template variable '{0}'")]
    UndeclaredVariable(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("generation failed, partial output recovered: {0:?}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, self::Error>;
