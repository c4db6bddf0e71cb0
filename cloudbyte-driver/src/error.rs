use elasticenter::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("volume '{0}' is not attached to this host")]
    NotAttached(String),

    #[error("target '{target}' not found during discovery at portal {portal}")]
    TargetNotDiscovered { portal: String, target: String },

    #[error("iSCSI session error: {0}")]
    Session(String),

    #[error("volume name '{0}' is not a dataset id")]
    InvalidDatasetId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;
