//! # backend-gateway
//!
//! A backend request router and health/traffic-control engine for a pool of
//! upstream services. This crate is a library consumed by a request-handling
//! layer; it decides *which* backend serves a request and tracks the outcome,
//! but never touches request or response bodies.
//!
//! ## Features
//!
//! - Seven selection policies, including a consistent-hash ring with
//!   virtual nodes
//! - Health probing (HTTP / TCP) with hysteresis thresholds
//! - Per-backend circuit breaker
//! - Token-bucket rate limiting per routing config
//! - Sticky sessions with TTL and background eviction
//! - Staged traffic shifting: canary rollouts and blue-green cutover
//!
//! ## Entry point
//!
//! Build a [`routers::RouterEngine`] from one or more
//! [`config::RoutingConfig`]s, then call
//! [`routers::RouterEngine::route_request`] per inbound request and report the
//! outcome with [`routers::RouterEngine::record_request_result`].

pub mod config;
pub mod core;
pub mod observability;
pub mod policies;
pub mod routers;

pub use config::RoutingConfig;
pub use core::{Backend, BackendRegistry, GatewayError, GatewayResult};
pub use policies::RequestContext;
pub use routers::{RouteDecision, RouterEngine};
