use argus_db::DbError;
use thiserror::Error;

/// Returned both when a referenced object is missing and when the caller may
/// not see it, so existence never leaks through the error.
pub const NO_PERMISSION: &str = "No permissions to referenced object or it does not exist!";

pub const NO_ACCESS: &str = "You do not have permission to perform this operation.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid parameter \"{path}\": {message}")]
    Parameter { path: String, message: String },

    #[error("{0}")]
    Permission(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl ApiError {
    pub fn parameter(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parameter {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn no_permission() -> Self {
        Self::Permission(NO_PERMISSION.into())
    }

    pub fn access_denied() -> Self {
        Self::Permission(NO_ACCESS.into())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(err))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
