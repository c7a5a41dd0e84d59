use thiserror::Error;

/// Errors surfaced by every [`super::Store`] operation.
///
/// The store never swallows an error: callers get one of these four kinds,
/// never a bare `rusqlite::Error` or a panic.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                if e.code == rusqlite::ErrorCode::ConstraintViolation {
                    StoreError::Duplicate(msg.clone().unwrap_or_else(|| err.to_string()))
                } else {
                    StoreError::Constraint(err.to_string())
                }
            }
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(err.to_string()),
            _ => StoreError::Constraint(err.to_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
