//! Request middleware: the telemetry wrapper and TTLB measurement.
//!
//! The wrapper sits between the host server and its handler:
//!
//! ```text
//! Request → span open → handler → metrics → (TTLB if streamed) → span close
//! ```

pub mod telemetry;
pub mod ttlb;

// Re-exports
pub use telemetry::RequestTelemetry;
pub use ttlb::{TtlbStrategy, TtlbTiming};
