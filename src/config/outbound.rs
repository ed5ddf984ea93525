//! Outbound request observer configuration.
//!
//! Label values and the observation predicate are user closures, so this
//! config carries no serde support and implements `Debug` by hand.

use std::fmt;
use std::sync::Arc;

use crate::outbound::ResourceTiming;

/// Derives a label value from an observed outbound timing entry.
/// Returning `None` falls back to the built-in default for that label.
pub type LabelFn = Arc<dyn Fn(&ResourceTiming) -> Option<String> + Send + Sync>;

/// Decides whether an outbound timing entry should be observed at all.
pub type ObservePredicate = Arc<dyn Fn(&ResourceTiming) -> bool + Send + Sync>;

/// Custom label derivation for outbound metrics.
#[derive(Clone, Default)]
pub struct OutboundLabels {
    /// Value for the `endpoint` label; default is the URL path.
    pub endpoint: Option<LabelFn>,
    /// Value for the `app` label; default is the crate name.
    pub app: Option<LabelFn>,
}

impl fmt::Debug for OutboundLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundLabels")
            .field("endpoint", &self.endpoint.as_ref().map(|_| "<fn>"))
            .field("app", &self.app.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Configuration for the outbound request observer.
#[derive(Clone)]
pub struct OutboundConfig {
    /// Observe outbound requests at all (default: false).
    pub enabled: bool,
    /// Record durations of errored requests into the histogram. The live
    /// observer exposes this as a runtime-mutable flag.
    pub include_errors: bool,
    /// Optional metric name prefix, e.g. `myapp` yields
    /// `myapp_outbound_requests_total`.
    pub prefix: Option<String>,
    /// Custom label derivation.
    pub labels: OutboundLabels,
    /// Skip entries for which this returns false.
    pub should_observe: Option<ObservePredicate>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            include_errors: false,
            prefix: None,
            labels: OutboundLabels::default(),
            should_observe: None,
        }
    }
}

impl fmt::Debug for OutboundConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundConfig")
            .field("enabled", &self.enabled)
            .field("include_errors", &self.include_errors)
            .field("prefix", &self.prefix)
            .field("labels", &self.labels)
            .field("should_observe", &self.should_observe.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl OutboundConfig {
    /// Enabled config with defaults for everything else.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_endpoint_label<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResourceTiming) -> Option<String> + Send + Sync + 'static,
    {
        self.labels.endpoint = Some(Arc::new(f));
        self
    }

    pub fn with_app_label<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResourceTiming) -> Option<String> + Send + Sync + 'static,
    {
        self.labels.app = Some(Arc::new(f));
        self
    }

    pub fn with_should_observe<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResourceTiming) -> bool + Send + Sync + 'static,
    {
        self.should_observe = Some(Arc::new(f));
        self
    }
}
