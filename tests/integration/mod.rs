//! Integration tests for hyperwatch
//!
//! Everything runs in-process: requests flow through the middleware into
//! real registries, the standalone server test scrapes an actual socket,
//! and the init-guard and outbound tests own their process-wide state.
//!
//! Run with: cargo test --test integration

mod helpers;

mod init_guard;
mod metrics_endpoint;
mod middleware_flow;
mod outbound;
