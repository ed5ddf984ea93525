//! Outbound request observation.
//!
//! `record` publishes resource-timing entries into a process-wide channel
//! created lazily on first use, so entries reported before the observer
//! starts are buffered and delivered when `init` subscribes. At most one
//! observer runs per process; `reset` tears it down for test isolation.

pub mod entry;
pub mod observer;

// Re-exports
pub use entry::{NormalizedEntry, ResourceTiming};
pub use observer::OutboundObserver;

use std::sync::{Arc, Mutex};

use prometheus::Registry;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::OutboundConfig;
use crate::core::{lock_unpoisoned, Error, Result};

/// Batch size for the drain task.
const BATCH_SIZE: usize = 64;

static CHANNEL: Mutex<Option<EntryChannel>> = Mutex::new(None);
static OBSERVER: Mutex<Option<ObserverHandle>> = Mutex::new(None);

struct EntryChannel {
    tx: UnboundedSender<ResourceTiming>,
    rx: Option<UnboundedReceiver<ResourceTiming>>,
}

impl EntryChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Running observer: shared instruments plus the drain task.
struct ObserverHandle {
    observer: Arc<OutboundObserver>,
    drain: JoinHandle<()>,
}

/// Publish an observed outbound exchange.
///
/// Non-blocking; entries are buffered until the observer subscribes.
pub fn record(timing: ResourceTiming) {
    let mut slot = lock_unpoisoned(&CHANNEL);
    let channel = slot.get_or_insert_with(EntryChannel::new);
    // A send can only fail in the window between reset() replacing the
    // channel and an aborted drain task dropping the old receiver.
    let _ = channel.tx.send(timing);
}

/// Start the process-wide outbound observer.
///
/// No-op when disabled by config or when an observer is already running.
/// Instruments are registered on `registry`; the drain task receives
/// buffered entries in batches.
pub fn init(config: &OutboundConfig, registry: &Registry) -> Result<()> {
    if !config.enabled {
        debug!("Outbound request observation disabled");
        return Ok(());
    }

    let mut slot = lock_unpoisoned(&OBSERVER);
    if slot.is_some() {
        debug!("Outbound observer already running");
        return Ok(());
    }

    let observer = Arc::new(OutboundObserver::new(config, registry)?);

    let rx = {
        let mut channel = lock_unpoisoned(&CHANNEL);
        channel.get_or_insert_with(EntryChannel::new).rx.take()
    };
    let Some(mut rx) = rx else {
        return Err(Error::Init(
            "outbound entry channel is already subscribed".to_string(),
        ));
    };

    let drain_observer = Arc::clone(&observer);
    let drain = tokio::spawn(async move {
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        while rx.recv_many(&mut batch, BATCH_SIZE).await > 0 {
            drain_observer.observe_batch(&batch);
            batch.clear();
        }
    });

    info!(include_errors = config.include_errors, "Outbound request observer started");
    *slot = Some(ObserverHandle { observer, drain });
    Ok(())
}

/// Flip the `include_errors` flag on the live observer.
pub fn set_include_errors(include: bool) {
    if let Some(handle) = lock_unpoisoned(&OBSERVER).as_ref() {
        handle.observer.set_include_errors(include);
    }
}

/// True when an observer is running.
pub fn is_active() -> bool {
    lock_unpoisoned(&OBSERVER).is_some()
}

/// Tear down the observer and drop buffered entries.
///
/// The next `init` subscribes to a fresh channel. Metrics already
/// registered stay on their registry.
pub fn reset() {
    if let Some(handle) = lock_unpoisoned(&OBSERVER).take() {
        handle.drain.abort();
    }
    *lock_unpoisoned(&CHANNEL) = Some(EntryChannel::new());
    debug!("Outbound observer reset");
}
