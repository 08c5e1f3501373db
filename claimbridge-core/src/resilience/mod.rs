//! Circuit breaking and bounded retry around every connector call.

pub mod breaker;
pub mod registry;
pub mod retry;
pub mod wrapper;

pub use breaker::{CircuitBreaker, Permit};
pub use registry::ConnectorRegistry;
pub use retry::RetryPolicy;
pub use wrapper::{CallReport, ResilientConnector};
