use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("employee {0} not found")]
    UnknownEmployee(String),

    #[error("employee {0} is disabled")]
    Disabled(String),

    #[error("{0}")]
    Invalid(String),
}

impl AttendanceError {
    /// Storage hiccups are worth a retry; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, AttendanceError::Store(StoreError::Backend(_)))
    }
}

pub type AttendanceResult<T> = Result<T, AttendanceError>;
