//! hyperwatch - HTTP observability toolkit for tokio services.
//!
//! This crate wires OpenTelemetry tracing and Prometheus/OTLP metrics into
//! an async HTTP service: a request middleware that counts and times every
//! request, exporter-aware instrument construction, a metrics endpoint
//! (host-mounted or standalone), default process metrics, and an observer
//! for outbound request timings.
//!
//! # Features
//!
//! - **Request middleware**: counters and duration histograms per request;
//!   streamed bodies get a separate time-to-last-byte measurement
//! - **Exporter presets**: Prometheus pull or OTLP push (gRPC, protobuf,
//!   JSON) selected by configuration; disabled instruments cost nothing
//! - **Idempotent init**: one SDK bring-up per process, no matter how many
//!   workers call it or how often the host hot-reloads
//! - **Outbound observer**: dedup-guarded metrics for upstream HTTP calls
//! - **Process metrics**: memory, CPU, fds and scheduler pause sampling
//!
//! # Example
//!
//! ```rust,ignore
//! use hyperwatch::Config;
//!
//! let sdk = hyperwatch::init(Config::from_env()?).await?;
//! let telemetry = sdk.telemetry().clone();
//!
//! // Inside the connection handler:
//! let response = telemetry.handle(request, |req| route(req)).await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git hash, "-dirty" suffixed when the tree has local changes;
/// empty outside a checkout.
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)" or "0.1.0 (abc12345-dirty)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod outbound;
pub mod sdk;
pub mod trace;

// Re-exports for convenience
pub use crate::core::{Error, Request, Response, Result};
pub use config::Config;
pub use middleware::RequestTelemetry;
pub use sdk::{init, Sdk};
