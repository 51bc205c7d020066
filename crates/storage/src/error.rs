use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Consistency error: {0}")]
    Consistency(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Coarse classification used by callers to decide between client-caused
/// failures and retryable server-side conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Consistency,
    Store,
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Consistency(_) => ErrorKind::Consistency,
            Self::Database(_) | Self::Migration(_) => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Consistency | ErrorKind::Store)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Database(sqlx::Error::Database(e))
                if e.code().as_deref() == Some("23505")
        )
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Database(sqlx::Error::Database(e))
                if e.code().as_deref() == Some("23503")
        )
    }

    /// Folds constraint violations raised by the database into the
    /// consistency class so they surface as conflicts instead of 500s.
    pub fn into_consistency(self, context: &str) -> Self {
        if self.is_unique_violation() || self.is_foreign_key_violation() {
            StorageError::Consistency(format!("{context}: {self}"))
        } else {
            self
        }
    }
}

impl From<validator::ValidationErrors> for StorageError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    format!(
                        "{}: {}",
                        field,
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    )
                })
            })
            .collect();

        StorageError::Validation(details.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            StorageError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            StorageError::not_found("record", 4).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StorageError::Consistency("x".into()).kind(),
            ErrorKind::Consistency
        );
        assert_eq!(
            StorageError::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Store
        );
    }

    #[test]
    fn test_retryable_only_for_server_side_conditions() {
        assert!(!StorageError::Validation("x".into()).is_retryable());
        assert!(!StorageError::not_found("race", 1).is_retryable());
        assert!(StorageError::Consistency("x".into()).is_retryable());
        assert!(StorageError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_not_found_message_names_entity() {
        let err = StorageError::not_found("record", 42);
        assert_eq!(err.to_string(), "record 42 not found");
    }
}
