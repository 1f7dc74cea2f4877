use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Consistency window violation: {0}")]
    WindowViolation(String),

    #[error("Invalid storage pool name: {0}")]
    InvalidPoolName(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
