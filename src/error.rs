use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivedbErrorCode {
    Configuration,
    TableNotFound,
    TableAlreadyExists,
    UnknownColumn,
    DuplicatePrimaryKey,
    NotNullViolation,
    TypeMismatch,
    Validation,
    Unavailable,
}

impl LivedbErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            LivedbErrorCode::Configuration => "configuration",
            LivedbErrorCode::TableNotFound => "table_not_found",
            LivedbErrorCode::TableAlreadyExists => "table_already_exists",
            LivedbErrorCode::UnknownColumn => "unknown_column",
            LivedbErrorCode::DuplicatePrimaryKey => "duplicate_primary_key",
            LivedbErrorCode::NotNullViolation => "not_null_violation",
            LivedbErrorCode::TypeMismatch => "type_mismatch",
            LivedbErrorCode::Validation => "validation",
            LivedbErrorCode::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum LivedbError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("table '{table}' not found")]
    TableNotFound { table: String },
    #[error("table '{table}' already exists")]
    TableAlreadyExists { table: String },
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("duplicate primary key in table '{table}': {key}")]
    DuplicatePrimaryKey { table: String, key: String },
    #[error("NOT NULL violation: column '{column}' in table '{table}'")]
    NotNullViolation { table: String, column: String },
    #[error(
        "type mismatch: column '{column}' in table '{table}' expected {expected}, got {actual}"
    )]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("database writer unavailable: {0}")]
    Unavailable(String),
}

impl LivedbError {
    pub fn code(&self) -> LivedbErrorCode {
        match self {
            LivedbError::Configuration(_) => LivedbErrorCode::Configuration,
            LivedbError::TableNotFound { .. } => LivedbErrorCode::TableNotFound,
            LivedbError::TableAlreadyExists { .. } => LivedbErrorCode::TableAlreadyExists,
            LivedbError::UnknownColumn { .. } => LivedbErrorCode::UnknownColumn,
            LivedbError::DuplicatePrimaryKey { .. } => LivedbErrorCode::DuplicatePrimaryKey,
            LivedbError::NotNullViolation { .. } => LivedbErrorCode::NotNullViolation,
            LivedbError::TypeMismatch { .. } => LivedbErrorCode::TypeMismatch,
            LivedbError::Validation(_) => LivedbErrorCode::Validation,
            LivedbError::Unavailable(_) => LivedbErrorCode::Unavailable,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::{LivedbError, LivedbErrorCode};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(LivedbErrorCode::TableNotFound.as_str(), "table_not_found");
        assert_eq!(
            LivedbErrorCode::DuplicatePrimaryKey.as_str(),
            "duplicate_primary_key"
        );
        assert_eq!(LivedbErrorCode::Configuration.as_str(), "configuration");
    }

    #[test]
    fn error_code_str_matches_variant_mapping() {
        let err = LivedbError::TableNotFound {
            table: "players".into(),
        };
        assert_eq!(err.code(), LivedbErrorCode::TableNotFound);
        assert_eq!(err.code_str(), "table_not_found");

        let err = LivedbError::UnknownColumn {
            table: "players".into(),
            column: "rank".into(),
        };
        assert_eq!(err.code(), LivedbErrorCode::UnknownColumn);
    }
}
