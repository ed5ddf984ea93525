//! Core types for HTTP request/response handling.
//!
//! This module provides the fundamental types used throughout the telemetry
//! middleware:
//!
//! - [`Request`] - HTTP request abstraction
//! - [`Response`] - HTTP response abstraction with builder pattern
//! - [`Body`] - buffered or streamed response body
//! - [`Error`] - crate error types
//!
//! # Example
//!
//! ```rust,ignore
//! use hyperwatch::core::{Request, Response};
//!
//! async fn handle_request(req: Request) -> hyperwatch::Result<Response> {
//!     Ok(Response::ok("Hello, World!"))
//! }
//! ```

mod body;
mod error;
mod request;
mod response;

use std::sync::{Mutex, MutexGuard};

pub use body::{Body, ByteStream};
pub use error::{Error, Result};
pub use request::Request;
pub use response::{Response, ResponseBuilder};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
