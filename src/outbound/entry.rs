//! Resource-timing entries and their normalization into metric labels.

use url::Url;

use crate::config::OutboundLabels;

/// Label value when the entry name is not a parseable URL and no explicit
/// host was provided.
const UNKNOWN_HOST: &str = "unknown";

/// Default `app` label value.
const DEFAULT_APP: &str = env!("CARGO_PKG_NAME");

/// One observed outbound HTTP exchange, as reported by the caller.
///
/// `name` is normally the request URL; a non-URL name is tolerated and falls
/// back to coarse labels. `start_time_ms` only participates in dedup, so any
/// stable per-request offset works.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceTiming {
    /// Request URL, or a raw identifier when no URL is known.
    pub name: String,
    /// HTTP method.
    pub method: String,
    /// Response status; `0` means no response arrived at all.
    pub status: u16,
    /// Start offset in milliseconds, used for dedup keying.
    pub start_time_ms: f64,
    /// Duration of the full exchange in milliseconds.
    pub duration_ms: f64,
    /// Explicit host override; wins over the URL hostname.
    pub host: Option<String>,
}

impl ResourceTiming {
    pub fn new(
        name: impl Into<String>,
        method: impl Into<String>,
        status: u16,
        start_time_ms: f64,
        duration_ms: f64,
    ) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            status,
            start_time_ms,
            duration_ms,
            host: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Dedup cache key. Duplicate deliveries of the same entry carry the
    /// same name, start offset and status.
    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.name, self.start_time_ms, self.status)
    }
}

/// A timing entry reduced to the label set recorded on outbound metrics.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedEntry {
    pub method: String,
    pub host: String,
    pub status: String,
    pub endpoint: String,
    pub app: String,
    pub duration_seconds: f64,
    pub is_error: bool,
    pub error_reason: Option<String>,
}

impl NormalizedEntry {
    /// Normalize a timing entry.
    ///
    /// The host label is the URL hostname without port; an explicit
    /// detail-provided host always wins. Unparseable names degrade to host
    /// `"unknown"` with the raw name as the endpoint. Status `0` or ≥ 400 is
    /// an error: `network_error` for no response, `HTTP_<code>` otherwise.
    pub fn from_timing(timing: &ResourceTiming, labels: &OutboundLabels) -> Self {
        let url = Url::parse(&timing.name).ok();

        let host = timing
            .host
            .clone()
            .or_else(|| {
                url.as_ref()
                    .and_then(|u| u.host_str())
                    .map(|h| h.to_string())
            })
            .unwrap_or_else(|| UNKNOWN_HOST.to_string());

        let default_endpoint = match &url {
            Some(u) => u.path().to_string(),
            None => timing.name.clone(),
        };

        let endpoint = labels
            .endpoint
            .as_ref()
            .and_then(|f| f(timing))
            .unwrap_or(default_endpoint);
        let app = labels
            .app
            .as_ref()
            .and_then(|f| f(timing))
            .unwrap_or_else(|| DEFAULT_APP.to_string());

        let is_error = timing.status == 0 || timing.status >= 400;
        let error_reason = if !is_error {
            None
        } else if timing.status == 0 {
            Some("network_error".to_string())
        } else {
            Some(format!("HTTP_{}", timing.status))
        };

        Self {
            method: timing.method.clone(),
            host,
            status: timing.status.to_string(),
            endpoint,
            app,
            duration_seconds: timing.duration_ms / 1000.0,
            is_error,
            error_reason,
        }
    }

    /// Label values in registration order: method, host, status, endpoint, app.
    pub fn label_values(&self) -> [&str; 5] {
        [
            &self.method,
            &self.host,
            &self.status,
            &self.endpoint,
            &self.app,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(name: &str, status: u16) -> ResourceTiming {
        ResourceTiming::new(name, "GET", status, 12.5, 250.0)
    }

    #[test]
    fn test_normalize_url_entry() {
        let entry = NormalizedEntry::from_timing(
            &timing("https://api.example.com:8443/v1/pets?limit=10", 200),
            &OutboundLabels::default(),
        );

        // Hostname only, no port; endpoint loses the query string.
        assert_eq!(entry.host, "api.example.com");
        assert_eq!(entry.endpoint, "/v1/pets");
        assert_eq!(entry.app, "hyperwatch");
        assert_eq!(entry.status, "200");
        assert_eq!(entry.duration_seconds, 0.25);
        assert!(!entry.is_error);
        assert!(entry.error_reason.is_none());
    }

    #[test]
    fn test_explicit_host_wins() {
        let timing = timing("https://10.0.0.5/health", 200).with_host("backend.internal");
        let entry = NormalizedEntry::from_timing(&timing, &OutboundLabels::default());
        assert_eq!(entry.host, "backend.internal");
    }

    #[test]
    fn test_unparseable_name_degrades() {
        let entry = NormalizedEntry::from_timing(
            &timing("not a url", 200),
            &OutboundLabels::default(),
        );
        assert_eq!(entry.host, "unknown");
        assert_eq!(entry.endpoint, "not a url");
    }

    #[test]
    fn test_status_zero_is_network_error() {
        let entry = NormalizedEntry::from_timing(
            &timing("https://api.example.com/v1/pets", 0),
            &OutboundLabels::default(),
        );
        assert!(entry.is_error);
        assert_eq!(entry.error_reason.as_deref(), Some("network_error"));
    }

    #[test]
    fn test_http_error_reason_carries_code() {
        let entry = NormalizedEntry::from_timing(
            &timing("https://api.example.com/v1/pets", 503),
            &OutboundLabels::default(),
        );
        assert!(entry.is_error);
        assert_eq!(entry.error_reason.as_deref(), Some("HTTP_503"));

        // 4xx counts as an error too.
        let entry = NormalizedEntry::from_timing(
            &timing("https://api.example.com/v1/pets", 404),
            &OutboundLabels::default(),
        );
        assert!(entry.is_error);
        assert_eq!(entry.error_reason.as_deref(), Some("HTTP_404"));
    }

    #[test]
    fn test_label_functions_override_defaults() {
        let labels = OutboundLabels {
            endpoint: Some(std::sync::Arc::new(|_: &ResourceTiming| {
                Some("/v1/pets/:id".to_string())
            })),
            app: Some(std::sync::Arc::new(|_: &ResourceTiming| {
                Some("billing".to_string())
            })),
        };
        let entry =
            NormalizedEntry::from_timing(&timing("https://api.example.com/v1/pets/7", 200), &labels);
        assert_eq!(entry.endpoint, "/v1/pets/:id");
        assert_eq!(entry.app, "billing");
    }

    #[test]
    fn test_label_function_none_falls_back() {
        let labels = OutboundLabels {
            endpoint: Some(std::sync::Arc::new(|_: &ResourceTiming| None)),
            app: None,
        };
        let entry =
            NormalizedEntry::from_timing(&timing("https://api.example.com/v1/pets", 200), &labels);
        assert_eq!(entry.endpoint, "/v1/pets");
        assert_eq!(entry.app, "hyperwatch");
    }

    #[test]
    fn test_cache_key_distinguishes_entries() {
        let a = timing("https://api.example.com/a", 200);
        let b = timing("https://api.example.com/a", 500);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
    }
}
