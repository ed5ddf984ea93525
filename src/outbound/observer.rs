//! Passive observer turning resource-timing entries into outbound metrics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::config::{ObservePredicate, OutboundConfig, OutboundLabels};
use crate::core::{lock_unpoisoned, Result};
use crate::metrics::instruments::HTTP_BUCKETS;
use crate::outbound::entry::{NormalizedEntry, ResourceTiming};

/// Entries seen within this window are counted once.
const DEDUP_TTL: Duration = Duration::from_secs(60);

const REQUEST_LABELS: &[&str] = &["method", "host", "status", "endpoint", "app"];
const ERROR_LABELS: &[&str] = &["method", "host", "status", "endpoint", "app", "error_reason"];

fn metric_name(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}_{}", p, name),
        _ => name.to_string(),
    }
}

/// Outbound request metrics plus the dedup cache.
///
/// `include_errors` is runtime-mutable: flipping it changes whether errored
/// entries land in the duration histogram from that point on.
pub struct OutboundObserver {
    requests_total: IntCounterVec,
    errors_total: IntCounterVec,
    duration_seconds: HistogramVec,
    include_errors: AtomicBool,
    labels: OutboundLabels,
    should_observe: Option<ObservePredicate>,
    dedup: Mutex<HashMap<String, Instant>>,
}

impl OutboundObserver {
    /// Build the instruments and register them on `registry`.
    pub fn new(config: &OutboundConfig, registry: &Registry) -> Result<Self> {
        let prefix = config.prefix.as_deref();

        let requests_total = IntCounterVec::new(
            Opts::new(
                metric_name(prefix, "outbound_requests_total"),
                "Total outbound HTTP requests observed",
            ),
            REQUEST_LABELS,
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new(
                metric_name(prefix, "outbound_request_errors_total"),
                "Outbound HTTP requests that failed",
            ),
            ERROR_LABELS,
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                metric_name(prefix, "outbound_request_duration_seconds"),
                "Outbound HTTP request duration in seconds",
            )
            .buckets(HTTP_BUCKETS.to_vec()),
            REQUEST_LABELS,
        )?;
        registry.register(Box::new(duration_seconds.clone()))?;

        Ok(Self {
            requests_total,
            errors_total,
            duration_seconds,
            include_errors: AtomicBool::new(config.include_errors),
            labels: config.labels.clone(),
            should_observe: config.should_observe.clone(),
            dedup: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn include_errors(&self) -> bool {
        self.include_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_include_errors(&self, include: bool) {
        self.include_errors.store(include, Ordering::Relaxed);
    }

    /// Process one batch from the drain task.
    pub fn observe_batch(&self, entries: &[ResourceTiming]) {
        self.prune_cache(Instant::now());
        for entry in entries {
            self.observe(entry);
        }
    }

    fn observe(&self, timing: &ResourceTiming) {
        if let Some(predicate) = &self.should_observe {
            if !predicate(timing) {
                return;
            }
        }

        if !self.mark_seen(timing) {
            debug!(name = %timing.name, "Skipping duplicate outbound entry");
            return;
        }

        let entry = NormalizedEntry::from_timing(timing, &self.labels);
        let values = entry.label_values();

        self.requests_total.with_label_values(&values).inc();

        if entry.is_error {
            let reason = entry.error_reason.as_deref().unwrap_or("unknown");
            let error_values = [
                values[0], values[1], values[2], values[3], values[4], reason,
            ];
            self.errors_total.with_label_values(&error_values).inc();

            if !self.include_errors() {
                return;
            }
        }

        self.duration_seconds
            .with_label_values(&values)
            .observe(entry.duration_seconds);
    }

    /// Record the entry in the dedup cache; false if it was already there.
    fn mark_seen(&self, timing: &ResourceTiming) -> bool {
        let key = timing.cache_key();
        let mut cache = lock_unpoisoned(&self.dedup);
        if cache.contains_key(&key) {
            return false;
        }
        cache.insert(key, Instant::now());
        true
    }

    fn prune_cache(&self, now: Instant) {
        let mut cache = lock_unpoisoned(&self.dedup);
        cache.retain(|_, seen| now.duration_since(*seen) < DEDUP_TTL);
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        lock_unpoisoned(&self.dedup).len()
    }
}

impl std::fmt::Debug for OutboundObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundObserver")
            .field("include_errors", &self.include_errors())
            .finish()
    }
}
