//! Runtime plumbing shared by the live-mode background units: cooperative
//! shutdown with drain tracking, and a circuit breaker for unreliable
//! collaborators.

pub mod circuit_breaker;
pub mod shutdown;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use shutdown::{DrainResult, ShutdownGuard, ShutdownListener, ShutdownSignal};
