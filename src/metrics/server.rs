//! Standalone HTTP server exposing the metrics endpoint.
//!
//! At most one instance runs per process, even if setup is invoked multiple
//! times (hot reload re-entry).

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::Method;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming as IncomingBody;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use prometheus::Registry;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::endpoint;
use crate::config::{Config, RegisterContentType};
use crate::core::{Response, Result};

/// Process-wide flag guarding against duplicate servers.
static STARTED: AtomicBool = AtomicBool::new(false);

/// Options for the standalone scrape server.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Bind host.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Path answering with the metrics snapshot.
    pub metrics_url: String,
    /// Exposition format.
    pub format: RegisterContentType,
    /// Stamp samples with the scrape time.
    pub append_timestamp: bool,
}

impl ServerOptions {
    /// Derive server options from the telemetry configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.presets.prometheus.host.clone(),
            port: config
                .standalone
                .port
                .unwrap_or(config.presets.prometheus.port),
            metrics_url: config.metrics_url.clone(),
            format: config.register_content_type,
            append_timestamp: config.presets.prometheus.append_timestamp,
        }
    }
}

/// Start the standalone metrics server.
///
/// Returns the bound address, or `None` when a server is already running in
/// this process. The accept loop runs on a detached task; it lives for the
/// rest of the process.
pub async fn start(registry: Registry, options: ServerOptions) -> Result<Option<SocketAddr>> {
    if STARTED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("Standalone metrics server already started, skipping");
        return Ok(None);
    }

    let listener = match TcpListener::bind((options.host.as_str(), options.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            // Leave the flag clear so a later attempt can bind.
            STARTED.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
    };
    let local_addr = listener.local_addr()?;

    info!(
        "Standalone metrics server listening on {}{}",
        local_addr, options.metrics_url
    );

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Metrics server accept error: {}", e);
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let registry = registry.clone();
            let options = options.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let registry = registry.clone();
                    let options = options.clone();
                    async move {
                        let response =
                            route(req.method(), req.uri().path(), &registry, &options);
                        Ok::<http::Response<BoxBody<Bytes, io::Error>>, Infallible>(
                            response.into(),
                        )
                    }
                });

                let io = TokioIo::new(stream);
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    Ok(Some(local_addr))
}

/// Route a request: the metrics path answers with the snapshot, everything
/// else is a plain 404.
fn route(method: &Method, path: &str, registry: &Registry, options: &ServerOptions) -> Response {
    if method == Method::GET && path == options.metrics_url {
        endpoint::handle_scrape(registry, options.format, options.append_timestamp)
    } else {
        Response::not_found().with_header("content-type", "text/plain")
    }
}
