use relmesh_core::engine::CheckError;
use relmesh_core::schema::{ParseError, SchemaError};
use relmesh_core::tuple::TupleError;
use relmesh_storage::StorageError;

/// The error categories surfaced at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    UniqueConstraint,
    SchemaUndefined,
    SchemaInvalid,
    Unavailable,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UniqueConstraint => "unique_constraint",
            ErrorKind::SchemaUndefined => "schema_undefined",
            ErrorKind::SchemaInvalid => "schema_invalid",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("schema validation errors: {}", format_schema_errors(.0))]
    SchemaInvalid(Vec<SchemaError>),

    #[error("check error: {0}")]
    Check(#[from] CheckError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("schema not found for entity '{0}'")]
    SchemaNotFound(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidArgument(_) | ApiError::Parse(_) => ErrorKind::InvalidArgument,
            ApiError::SchemaInvalid(_) => ErrorKind::SchemaInvalid,
            ApiError::Check(err) => match err {
                CheckError::UndefinedEntity(_) | CheckError::Undefined { .. } => {
                    ErrorKind::SchemaUndefined
                }
                CheckError::Unavailable(_) => ErrorKind::Unavailable,
                CheckError::Cancelled => ErrorKind::Cancelled,
                CheckError::MaxDepthExceeded(_) | CheckError::Internal(_) => ErrorKind::Internal,
            },
            ApiError::Storage(err) => match err {
                StorageError::UniqueConstraint(_) => ErrorKind::UniqueConstraint,
                StorageError::NotFound(_) => ErrorKind::NotFound,
                StorageError::Unavailable(_) | StorageError::CircuitOpen { .. } => {
                    ErrorKind::Unavailable
                }
                StorageError::Internal(_) => ErrorKind::Internal,
            },
            ApiError::SchemaNotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl From<TupleError> for ApiError {
    fn from(err: TupleError) -> Self {
        ApiError::InvalidArgument(err.to_string())
    }
}

fn format_schema_errors(errors: &[SchemaError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
