//! Core building blocks: backends, registry, health, circuit breaking,
//! rate limiting and session affinity.

pub mod backend;
pub mod circuit_breaker;
pub mod error;
pub mod health;
pub mod registry;
pub mod session;
pub mod token_bucket;

pub use backend::{Backend, BackendConfig, BackendSnapshot, ConnectionGuard, Protocol};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition};
pub use error::{GatewayError, GatewayResult, ProbeError};
pub use health::{
    AlwaysHealthyProbe, HealthCheckConfig, HealthMonitor, HealthProbe, HealthTransition, HttpProbe,
    ProbeKind, TcpProbe,
};
pub use registry::{BackendRegistry, HashRing, RegistryStats};
pub use session::{
    AffinityMode, SessionAffinityConfig, SessionSnapshot, SessionStore, SessionSweeper,
};
pub use token_bucket::{RateLimitConfig, RateLimiter, TokenBucket};
