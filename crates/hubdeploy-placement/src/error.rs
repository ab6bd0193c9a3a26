use hubdeploy_core::HardwareError;
use thiserror::Error;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid cpu quantity {0:?}")]
    InvalidCpu(String),

    #[error("invalid memory quantity {0:?}")]
    InvalidMemory(String),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}
