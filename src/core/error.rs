//! Error types for the gateway core.
//!
//! Request-path errors (configuration, capacity, availability) propagate
//! synchronously to the caller of `route_request`. Background failures (health
//! probes, rollout steps) are contained in their tasks and never surface here.

/// Gateway errors surfaced to request callers and admin operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Routing config not found: {id}")]
    ConfigNotFound { id: String },

    #[error("Backend not found: {id}")]
    BackendNotFound { id: String },

    #[error("Rate limit exceeded for config {config_id}")]
    RateLimited { config_id: String },

    #[error("No healthy backend available for config {config_id}")]
    NoAvailableBackend { config_id: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Probe-level errors, contained within the health monitor task.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Probe timed out for backend {backend_id}")]
    Timeout { backend_id: String },

    #[error("Probe I/O error for backend {backend_id}: {reason}")]
    Io { backend_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_config_not_found_display() {
        let error = GatewayError::ConfigNotFound {
            id: "api-pool".to_string(),
        };
        assert_eq!(error.to_string(), "Routing config not found: api-pool");
    }

    #[test]
    fn test_rate_limited_display() {
        let error = GatewayError::RateLimited {
            config_id: "api-pool".to_string(),
        };
        assert_eq!(error.to_string(), "Rate limit exceeded for config api-pool");
    }

    #[test]
    fn test_no_available_backend_display() {
        let error = GatewayError::NoAvailableBackend {
            config_id: "api-pool".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "No healthy backend available for config api-pool"
        );
    }

    #[test]
    fn test_gateway_error_implements_std_error() {
        let error = GatewayError::BackendNotFound {
            id: "b1".to_string(),
        };
        let _: &dyn Error = &error;
        assert!(error.source().is_none());
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
        assert_send_sync::<ProbeError>();
    }
}
