use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("FORBIDDEN: {0}")]
    Forbidden(String),
    #[error("VALIDATION_FAILED: {0}")]
    Validation(String),
    #[error("CONSISTENCY_FAILED: {0}")]
    Consistency(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Consistency(_) => "CONSISTENCY_FAILED",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Message without the code prefix, as shown to API clients.
    pub fn reason(&self) -> &str {
        match self {
            Self::NotFound(reason)
            | Self::Forbidden(reason)
            | Self::Validation(reason)
            | Self::Consistency(reason)
            | Self::Io(reason)
            | Self::Internal(reason) => reason,
        }
    }

    /// Misuse by the caller, as opposed to a storage or internal fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Forbidden(_) | Self::Validation(_) | Self::Consistency(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn display_carries_code_prefix_and_reason_strips_it() {
        let error = AppError::Consistency("nachfrist_2 must be after termin_mangelbeseitigung".to_string());
        assert_eq!(
            error.to_string(),
            "CONSISTENCY_FAILED: nachfrist_2 must be after termin_mangelbeseitigung"
        );
        assert_eq!(error.code(), "CONSISTENCY_FAILED");
        assert_eq!(error.reason(), "nachfrist_2 must be after termin_mangelbeseitigung");
        assert!(error.is_client_error());
        assert!(!AppError::Io("disk full".to_string()).is_client_error());
    }
}
