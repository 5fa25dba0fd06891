use thiserror::Error;

/// Request-fatal failure classes and their HTTP mapping.
///
/// Per-message and per-folder anomalies never become a `ServiceError`; they
/// are absorbed (and logged) where they occur. Only parameter, credential,
/// transport and unexpected-protocol failures abort a request.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Missing or out-of-range request argument.
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// Token exchange failed or the mail server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Timeout, refused connection or lost transport.
    #[error("network error: {0}")]
    Network(String),

    /// The mail server answered something we could not work with.
    #[error("mail protocol error: {0}")]
    Protocol(String),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Parameter(_) => 400,
            ServiceError::Auth(_) | ServiceError::Network(_) | ServiceError::Protocol(_) => 500,
        }
    }

    /// Transport-level failures propagate out of any scope; everything else
    /// can be contained at folder or message granularity.
    pub fn is_network(&self) -> bool {
        matches!(self, ServiceError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_errors_are_client_errors() {
        assert_eq!(ServiceError::Parameter("x".into()).status_code(), 400);
    }

    #[test]
    fn everything_else_is_a_server_error() {
        assert_eq!(ServiceError::Auth("x".into()).status_code(), 500);
        assert_eq!(ServiceError::Network("x".into()).status_code(), 500);
        assert_eq!(ServiceError::Protocol("x".into()).status_code(), 500);
    }

    #[test]
    fn only_network_is_network() {
        assert!(ServiceError::Network("x".into()).is_network());
        assert!(!ServiceError::Protocol("x".into()).is_network());
    }
}
