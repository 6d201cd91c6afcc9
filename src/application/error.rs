use thiserror::Error;

use crate::{
    application::{feed::FeedError, mutations::MutationError},
    config::LoadError,
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Error surfaced at the binary boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Messages of this error and every error in its source chain.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = std::error::Error::source(self);
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::mutations::RolledBackChange;
    use crate::application::repos::StoreError;

    #[test]
    fn chain_walks_sources() {
        let err = AppError::from(MutationError::RolledBack {
            change: RolledBackChange::Unsave {
                post_id: "p1".to_string(),
            },
            source: StoreError::transient("offline"),
        });

        assert_eq!(
            err.chain(),
            vec![
                "unsave of post `p1` was rolled back: transient store failure: offline".to_string(),
                "transient store failure: offline".to_string(),
            ]
        );
    }
}
