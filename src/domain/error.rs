use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("malformed `{entity}` document `{id}`: {message}")]
    Malformed {
        entity: &'static str,
        id: String,
        message: String,
    },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn malformed(
        entity: &'static str,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Malformed {
            entity,
            id: id.into(),
            message: message.into(),
        }
    }
}
