//! Default process metrics: memory, file descriptors, CPU time and a
//! scheduler pause sampler.
//!
//! Gauge values are refreshed from `/proc` on every scrape via a custom
//! collector; on platforms without `/proc` the reads fail gracefully and the
//! gauges stay at zero.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::DefaultMetricsConfig;
use crate::core::Result;

// Linux defaults; /proc reports pages and clock ticks in these units.
const PAGE_SIZE: u64 = 4096;
const CLK_TCK: f64 = 100.0;

/// Prefix a metric name, skipping empty prefixes.
fn metric_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", prefix, name)
    }
}

/// CPU and start-time fields from `/proc/self/stat`.
struct ProcStat {
    utime: u64,
    stime: u64,
    starttime: u64,
}

/// Read `/proc/self/stat`, skipping past the parenthesized comm field.
fn read_proc_stat() -> Option<ProcStat> {
    let content = fs::read_to_string("/proc/self/stat").ok()?;
    let rest = content.rsplit_once(')').map(|(_, r)| r)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // Fields past comm: utime is stat field 14, stime 15, starttime 22.
    Some(ProcStat {
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
        starttime: fields.get(19)?.parse().ok()?,
    })
}

/// Read virtual and resident set size in bytes from `/proc/self/statm`.
fn read_statm() -> Option<(u64, u64)> {
    let content = fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = content.split_whitespace();
    let virtual_pages: u64 = fields.next()?.parse().ok()?;
    let resident_pages: u64 = fields.next()?.parse().ok()?;
    Some((virtual_pages * PAGE_SIZE, resident_pages * PAGE_SIZE))
}

/// Count open file descriptors.
fn read_open_fds() -> Option<u64> {
    fs::read_dir("/proc/self/fd")
        .ok()
        .map(|entries| entries.count() as u64)
}

/// Read the boot time (unix seconds) from `/proc/stat`.
fn read_boot_time() -> Option<u64> {
    let content = fs::read_to_string("/proc/stat").ok()?;
    content
        .lines()
        .find(|l| l.starts_with("btime "))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

/// Process-level gauges refreshed on scrape.
pub struct ProcessCollector {
    resident_memory: Gauge,
    virtual_memory: Gauge,
    open_fds: Gauge,
    start_time: Gauge,
    cpu_seconds: Counter,
}

impl ProcessCollector {
    /// Build the collector with optional name prefix and constant labels.
    pub fn new(prefix: &str, labels: &HashMap<String, String>) -> Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(metric_name(prefix, name), help).const_labels(labels.clone())
        };

        let collector = Self {
            resident_memory: Gauge::with_opts(opts(
                "process_resident_memory_bytes",
                "Resident set size in bytes",
            ))?,
            virtual_memory: Gauge::with_opts(opts(
                "process_virtual_memory_bytes",
                "Virtual memory size in bytes",
            ))?,
            open_fds: Gauge::with_opts(opts(
                "process_open_fds",
                "Number of open file descriptors",
            ))?,
            start_time: Gauge::with_opts(opts(
                "process_start_time_seconds",
                "Process start time in unix seconds",
            ))?,
            cpu_seconds: Counter::with_opts(opts(
                "process_cpu_seconds_total",
                "Total user and system CPU time in seconds",
            ))?,
        };

        // Start time never changes; read it once.
        if let (Some(stat), Some(boot_time)) = (read_proc_stat(), read_boot_time()) {
            collector
                .start_time
                .set(boot_time as f64 + stat.starttime as f64 / CLK_TCK);
        }

        Ok(collector)
    }

    /// Refresh gauge values from `/proc`.
    fn refresh(&self) {
        if let Some((virtual_bytes, resident_bytes)) = read_statm() {
            self.virtual_memory.set(virtual_bytes as f64);
            self.resident_memory.set(resident_bytes as f64);
        }

        if let Some(fds) = read_open_fds() {
            self.open_fds.set(fds as f64);
        }

        if let Some(stat) = read_proc_stat() {
            let total = (stat.utime + stat.stime) as f64 / CLK_TCK;
            let delta = total - self.cpu_seconds.get();
            if delta > 0.0 {
                self.cpu_seconds.inc_by(delta);
            }
        }
    }
}

impl Collector for ProcessCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.resident_memory.desc();
        descs.extend(self.virtual_memory.desc());
        descs.extend(self.open_fds.desc());
        descs.extend(self.start_time.desc());
        descs.extend(self.cpu_seconds.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.refresh();

        let mut families = Vec::with_capacity(5);
        families.extend(self.resident_memory.collect());
        families.extend(self.virtual_memory.collect());
        families.extend(self.open_fds.collect());
        families.extend(self.start_time.collect());
        families.extend(self.cpu_seconds.collect());
        families
    }
}

/// Register the process collector and the scheduler pause histogram.
///
/// Returns the pause histogram so the caller can start the sampler. The
/// prefix falls back to `fallback_prefix` when the config leaves it unset.
pub fn register(
    registry: &Registry,
    config: &DefaultMetricsConfig,
    fallback_prefix: &str,
) -> Result<Histogram> {
    let prefix = config.prefix.as_deref().unwrap_or(fallback_prefix);

    let collector = ProcessCollector::new(prefix, &config.labels)?;
    registry.register(Box::new(collector))?;

    let pause_histogram = Histogram::with_opts(
        HistogramOpts::new(
            metric_name(prefix, "process_scheduler_pause_seconds"),
            "Oversleep of the sampler interval, in seconds",
        )
        .const_labels(config.labels.clone())
        .buckets(config.pause_buckets.clone()),
    )?;
    registry.register(Box::new(pause_histogram.clone()))?;

    Ok(pause_histogram)
}

/// Spawn the scheduler pause sampler.
///
/// Sleeps for `interval` in a loop and observes how far past the deadline
/// the task actually woke up.
pub fn spawn_pause_sampler(histogram: Histogram, interval: Duration) -> JoinHandle<()> {
    debug!(
        "Starting scheduler pause sampler (interval {}ms)",
        interval.as_millis()
    );

    tokio::spawn(async move {
        loop {
            let start = std::time::Instant::now();
            tokio::time::sleep(interval).await;
            let pause = start.elapsed().saturating_sub(interval);
            histogram.observe(pause.as_secs_f64());
        }
    })
}
