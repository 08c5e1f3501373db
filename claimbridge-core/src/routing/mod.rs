//! Strategy selection.

pub mod selector;
pub mod stats;

pub use selector::RoutingSelector;
pub use stats::{PayerStats, RouteStats};
