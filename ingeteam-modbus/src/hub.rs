//! Polling hub: connection lifecycle, periodic reads and observer fan-out.
//!
//! The hub is idle until the first observer subscribes. It then connects
//! and starts a timer that fires every `scan_interval_secs`. Each tick
//! checks the connection, reads and decodes the register blocks, swaps in
//! the new [`Snapshot`] and calls every observer in registration order.
//! When the last observer unsubscribes the timer stops and the
//! connection is closed.

use crate::config::HubConfig;
use crate::decoder::{RegisterDecoder, RegisterWindow};
use crate::error::PollError;
use crate::registers::{FIELDS, FieldSpec, SensorGroup};
use crate::snapshot::{Snapshot, Value};
use crate::transport::{RegisterTransport, TcpTransport, TransportConnection};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Callback invoked after each successful poll.
///
/// Observers should only flag that new data is available and return
/// quickly; the current values are pulled with [`ModbusHub::get`] or
/// [`ModbusHub::snapshot`].
pub type Observer = Arc<dyn Fn() + Send + Sync>;

/// Handle identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new snapshot was published and `notified` observers were called.
    Updated { notified: usize },
    /// No observers are registered; nothing was read.
    Idle,
    /// Another tick is still in flight; this one was dropped.
    Busy,
    /// The connection or read failed; the previous snapshot is kept.
    Failed,
}

/// Registered observers, in registration order.
#[derive(Default)]
struct ObserverRegistry {
    next_id: u64,
    entries: Vec<(ObserverId, Observer)>,
}

impl ObserverRegistry {
    fn add(&mut self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, observer));
        id
    }

    fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    fn handles(&self) -> Vec<Observer> {
        self.entries.iter().map(|(_, o)| o.clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The running poll loop.
struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollTask {
    /// Stop the loop, letting an in-flight tick finish first.
    async fn stop(self, hub: &str) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!(hub = %hub, error = %e, "Poll loop terminated abnormally");
        }
    }
}

/// State shared between the hub handle, the poll loop and tick tasks.
struct Shared<T> {
    config: HubConfig,
    connection: TransportConnection<T>,
    decoder: Box<dyn RegisterDecoder>,
    snapshot: RwLock<Arc<Snapshot>>,
    observers: Mutex<ObserverRegistry>,
    /// Held for the duration of a tick so ticks never overlap.
    tick_guard: tokio::sync::Mutex<()>,
}

impl<T: RegisterTransport + 'static> Shared<T> {
    async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!(hub = %self.config.name, "Previous tick still running, skipping");
            return TickOutcome::Busy;
        };

        let idle = self.observers.lock().is_empty();
        if idle {
            return TickOutcome::Idle;
        }

        // A failed reconnect is logged by the connection itself.
        if !self.connection.ensure_connected().await {
            return TickOutcome::Failed;
        }

        let snapshot = match self.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(hub = %self.config.name, error = %e, "Failed to read inverter data");
                return TickOutcome::Failed;
            }
        };

        let snapshot = snapshot.with_timestamp(chrono::Utc::now().timestamp_millis());
        debug!(hub = %self.config.name, values = snapshot.len(), "Snapshot updated");
        *self.snapshot.write() = Arc::new(snapshot);

        let observers = self.observers.lock().handles();
        for observer in &observers {
            observer();
        }

        TickOutcome::Updated {
            notified: observers.len(),
        }
    }

    async fn read_snapshot(&self) -> Result<Snapshot, PollError> {
        let blocks = self.decoder.blocks();
        let mut windows = Vec::with_capacity(blocks.len());

        for block in blocks {
            let words = self
                .connection
                .read_registers(self.config.unit_id, block.address, block.count)
                .await?;
            windows.push(RegisterWindow::new(block.address, words));
        }

        Ok(self.decoder.decode(&windows)?)
    }
}

/// Run one tick in its own task so a panic is contained to that tick.
async fn run_tick<T: RegisterTransport + 'static>(shared: Arc<Shared<T>>) -> TickOutcome {
    let hub = shared.config.name.clone();
    match tokio::spawn(async move { shared.tick().await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(hub = %hub, error = %e, "Unexpected error while polling inverter");
            TickOutcome::Failed
        }
    }
}

async fn poll_loop<T: RegisterTransport + 'static>(
    shared: Arc<Shared<T>>,
    mut stop: watch::Receiver<bool>,
) {
    let period = shared.config.scan_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                run_tick(shared.clone()).await;
            }
        }
    }

    debug!(hub = %shared.config.name, "Poll loop stopped");
}

/// Polling hub for one inverter.
///
/// Owns the connection and the latest snapshot. Observers subscribe and
/// unsubscribe through [`subscribe`](Self::subscribe) and
/// [`unsubscribe`](Self::unsubscribe); polling runs if and only if at
/// least one observer is registered.
pub struct ModbusHub<T: RegisterTransport + 'static = TcpTransport> {
    shared: Arc<Shared<T>>,
    /// Serializes subscribe/unsubscribe and owns the poll loop.
    poller: tokio::sync::Mutex<Option<PollTask>>,
}

impl ModbusHub<TcpTransport> {
    /// Create a hub talking Modbus/TCP to the configured inverter.
    pub fn new(config: HubConfig) -> Self {
        let transport = TcpTransport::new(config.host.clone(), config.port, config.timeout());
        Self::with_transport(config, transport)
    }
}

impl<T: RegisterTransport + 'static> ModbusHub<T> {
    /// Create a hub on top of an arbitrary transport.
    pub fn with_transport(config: HubConfig, transport: T) -> Self {
        let decoder = config.layout.decoder();
        Self {
            shared: Arc::new(Shared {
                config,
                connection: TransportConnection::new(transport),
                decoder,
                snapshot: RwLock::new(Arc::new(Snapshot::new())),
                observers: Mutex::new(ObserverRegistry::default()),
                tick_guard: tokio::sync::Mutex::new(()),
            }),
            poller: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Whether the external meter group is exposed.
    pub fn has_meter(&self) -> bool {
        self.shared.config.read_meter
    }

    /// Whether the battery group is exposed.
    pub fn has_battery(&self) -> bool {
        self.shared.config.read_battery
    }

    /// Fields the host should expose, given the meter and battery flags.
    pub fn visible_fields(&self) -> impl Iterator<Item = &'static FieldSpec> + '_ {
        FIELDS.iter().filter(move |field| match field.group {
            SensorGroup::Meter => self.has_meter(),
            SensorGroup::Battery => self.has_battery(),
            _ => true,
        })
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.snapshot.read().clone()
    }

    /// Current value of one measurement.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.snapshot.read().get(key).cloned()
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers.lock().len()
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    /// Register an observer. The first one connects and starts polling.
    pub async fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut poller = self.poller.lock().await;
        let id = self.shared.observers.lock().add(Arc::new(observer));

        if poller.is_none() {
            // A failed connect is retried by the first tick.
            self.shared.connection.connect().await;
            *poller = Some(self.start_polling());
        }

        id
    }

    /// Remove an observer. Removing the last one stops polling and closes
    /// the connection. Returns `false` if the handle was not registered.
    pub async fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut poller = self.poller.lock().await;
        let (removed, empty) = {
            let mut observers = self.shared.observers.lock();
            (observers.remove(id), observers.is_empty())
        };

        if !removed {
            return false;
        }

        if empty {
            if let Some(task) = poller.take() {
                task.stop(self.name()).await;
                self.shared.connection.close().await;
                info!(hub = %self.name(), "Stopped polling");
            }
        }

        true
    }

    /// Run one tick now, outside the timer.
    pub async fn refresh(&self) -> TickOutcome {
        run_tick(self.shared.clone()).await
    }

    /// Drop every observer, stop polling and close the connection.
    pub async fn shutdown(&self) {
        let mut poller = self.poller.lock().await;
        self.shared.observers.lock().clear();

        if let Some(task) = poller.take() {
            task.stop(self.name()).await;
        }
        self.shared.connection.close().await;
    }

    fn start_polling(&self) -> PollTask {
        info!(
            hub = %self.name(),
            host = %self.shared.config.host,
            port = self.shared.config.port,
            interval_secs = self.shared.config.scan_interval_secs,
            layout = self.shared.config.layout.as_str(),
            "Starting polling"
        );

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(self.shared.clone(), stop_rx));
        PollTask { stop, handle }
    }
}

impl<T: RegisterTransport + 'static> Drop for ModbusHub<T> {
    fn drop(&mut self) {
        if let Some(task) = self.poller.get_mut().take() {
            task.handle.abort();
        }
    }
}
