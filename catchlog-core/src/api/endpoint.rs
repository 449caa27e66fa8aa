//! Collaborator contract for catch creation and its failure taxonomy

use async_trait::async_trait;
use std::fmt;

use crate::types::{CatchCreateInput, CatchRecord};

/// How the sync engine must react to a failed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitErrorKind {
    /// Network failure, timeout, 408, 429 or 5xx: retry on a later pass
    Transient,
    /// Any other 4xx: the payload needs user attention
    Validation,
    /// 401: stop the pass and wait for re-authentication
    Auth,
}

/// A failed catch submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitError {
    pub kind: SubmitErrorKind,
    /// HTTP status, when the server answered
    pub status: Option<u16>,
    pub message: String,
}

impl SubmitError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: SubmitErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: SubmitErrorKind::Validation,
            status: Some(422),
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: SubmitErrorKind::Auth,
            status: Some(401),
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            401 => SubmitErrorKind::Auth,
            408 | 429 => SubmitErrorKind::Transient,
            400..=499 => SubmitErrorKind::Validation,
            _ => SubmitErrorKind::Transient,
        };
        Self {
            kind,
            status: Some(status),
            message: body.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == SubmitErrorKind::Transient
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SubmitErrorKind::Transient => "transient",
            SubmitErrorKind::Validation => "rejected",
            SubmitErrorKind::Auth => "unauthorized",
        };
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", kind, status, self.message),
            None => write!(f, "{}: {}", kind, self.message),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Remote catch-creation endpoint.
///
/// Implementations must forward `idempotency_key` so that delivering the
/// same mutation twice creates one catch.
#[async_trait]
pub trait CatchEndpoint: Send + Sync {
    async fn create_catch(
        &self,
        input: &CatchCreateInput,
        idempotency_key: &str,
    ) -> std::result::Result<CatchRecord, SubmitError>;
}

/// Something that can tell whether the backend is reachable
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(SubmitError::from_status(401, "").kind, SubmitErrorKind::Auth);
        assert_eq!(
            SubmitError::from_status(400, "bad").kind,
            SubmitErrorKind::Validation
        );
        assert_eq!(
            SubmitError::from_status(403, "forbidden").kind,
            SubmitErrorKind::Validation
        );
        assert_eq!(
            SubmitError::from_status(422, "weight").kind,
            SubmitErrorKind::Validation
        );
        assert!(SubmitError::from_status(408, "").is_transient());
        assert!(SubmitError::from_status(429, "").is_transient());
        assert!(SubmitError::from_status(500, "").is_transient());
        assert!(SubmitError::from_status(503, "").is_transient());
    }

    #[test]
    fn test_display_includes_status() {
        let err = SubmitError::from_status(503, "maintenance");
        assert_eq!(err.to_string(), "transient (503): maintenance");
        assert_eq!(
            SubmitError::transient("connection refused").to_string(),
            "transient: connection refused"
        );
    }
}
