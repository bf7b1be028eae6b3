use serde::Serialize;
use ulid::Ulid;

use crate::model::{Span, Table};
use crate::store::StoreError;

/// One rejected form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// One occurrence that would double-book a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub room_id: Ulid,
    pub room_name: String,
    pub requested: Span,
    /// `None` when the clash is with another occurrence of the same submission.
    pub conflicting_id: Option<Ulid>,
    pub conflicting: Span,
    pub conflicting_title: String,
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.conflicting_id {
            Some(_) => write!(
                f,
                "{} is already booked {} (\"{}\"); requested {}",
                self.room_name, self.conflicting, self.conflicting_title, self.requested
            ),
            None => write!(
                f,
                "{}: occurrence {} overlaps another occurrence of this series at {}",
                self.room_name, self.requested, self.conflicting
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Incomplete or invalid input; nothing was written.
    Validation(Vec<FieldError>),
    /// At least one occurrence overlaps an existing reservation; nothing was written.
    Conflict(Vec<ConflictReport>),
    NotFound { table: Table, id: Ulid },
    /// The row is still referenced and cannot be removed.
    InUse(&'static str),
    /// The persistence collaborator failed; partial writes were rolled back.
    Store(StoreError),
}

impl EngineError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation(vec![FieldError::new(field, message)])
    }

    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound { .. } => "not_found",
            EngineError::InUse(_) => "in_use",
            EngineError::Store(_) => "storage",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(fields) => {
                write!(f, "invalid input: ")?;
                for (i, e) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", e.field, e.message)?;
                }
                Ok(())
            }
            EngineError::Conflict(reports) => {
                write!(f, "booking conflict: ")?;
                for (i, r) in reports.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{r}")?;
                }
                Ok(())
            }
            EngineError::NotFound { table, id } => write!(f, "not found: {table} {id}"),
            EngineError::InUse(msg) => write!(f, "still in use: {msg}"),
            EngineError::Store(e) => write!(f, "could not save changes: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { table, id } => EngineError::NotFound { table, id },
            other => EngineError::Store(other),
        }
    }
}
