//! Metrics: exporter-aware instruments, default process metrics, and the
//! Prometheus scrape endpoint.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hyperwatch::config::MetricExporter;
//! use hyperwatch::metrics::InstrumentSet;
//! use prometheus::Registry;
//!
//! let registry = Registry::new();
//! let instruments = InstrumentSet::for_exporter(MetricExporter::Prometheus, &registry, None)?;
//! instruments.record_request(&labels, 0.05);
//! ```

pub mod default_metrics;
pub mod endpoint;
pub mod instruments;
pub mod server;

// Re-exports
pub use endpoint::{content_type, handle_scrape, render};
pub use instruments::{DurationHistogram, InstrumentSet, TimingLabels};
pub use server::ServerOptions;
