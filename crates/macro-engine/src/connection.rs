//! Reactive connection manager
//!
//! Wires a source node's output stream to a target node's input sink.
//! Every connection gets:
//!
//! - a leading + trailing throttle, so bursts collapse to the first and
//!   the settled last value without ever reordering
//! - per-event error isolation (errors and panics in the target are
//!   counted, the subscription survives)
//! - a health timer flagging connections that went silent
//!
//! The manager owns every subscription. Destroying (or dropping) it
//! severs all of them and stops every background timer.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::ConnectionSettings;
use crate::error::{MacroEngineError, Result};
use crate::node::MacroNode;
use crate::stream::{InputSink, Subscription};
use crate::types::{now_ms, ConnectionHandle, Endpoint};

/// Estimated bytes held per live connection
const CONNECTION_MEMORY_BYTES: u64 = 2048;
/// Estimated buffered bytes per event/s of throughput
const BYTES_PER_EVENT_HZ: f64 = 64.0;
const CPU_PERCENT_PER_CONNECTION: f64 = 0.01;
const CPU_PERCENT_PER_KHZ: f64 = 1.5;

/// Health report for one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub connection_id: String,
    pub healthy: bool,
    pub last_data_flow: Option<i64>,
    /// Time since the last observed event (or since creation)
    pub silence_ms: u64,
    /// Mean time spent delivering one event
    pub latency_ms: f64,
    /// Delivered events per second since creation
    pub throughput_hz: f64,
    pub event_count: u64,
    pub error_count: u64,
}

/// Aggregate metrics across all connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub error_count: u64,
    pub total_latency_ms: f64,
    pub average_latency_ms: f64,
    /// Sampled on the metrics tick
    pub throughput_hz: f64,
    /// Coarse estimate, not measured
    pub memory_usage_bytes: u64,
    /// Coarse estimate, not measured
    pub cpu_usage_percent: f64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    events: AtomicU64,
    errors: AtomicU64,
    latency_us: AtomicU64,
}

impl Counters {
    fn decrement_active(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    fn reset(&self) {
        self.total_connections.store(0, Ordering::SeqCst);
        self.active_connections.store(0, Ordering::SeqCst);
        self.events.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
        self.latency_us.store(0, Ordering::SeqCst);
    }
}

struct ThroughputSample {
    at: Instant,
    events: u64,
    hz: f64,
}

impl ThroughputSample {
    fn new() -> Self {
        Self {
            at: Instant::now(),
            events: 0,
            hz: 0.0,
        }
    }
}

struct ConnectionStats {
    created_at: Instant,
    last_flow: Mutex<Option<(Instant, i64)>>,
    events: AtomicU64,
    errors: AtomicU64,
    latency_us: AtomicU64,
    healthy: AtomicBool,
}

impl ConnectionStats {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            last_flow: Mutex::new(None),
            events: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency_us: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    fn mark_flow(&self) {
        *self.last_flow.lock() = Some((Instant::now(), now_ms()));
    }

    fn last_flow_ms(&self) -> Option<i64> {
        self.last_flow.lock().map(|(_, ms)| ms)
    }

    fn silence(&self) -> Duration {
        match *self.last_flow.lock() {
            Some((at, _)) => at.elapsed(),
            None => self.created_at.elapsed(),
        }
    }
}

type Deliver = Box<dyn Fn(Value) + Send + Sync>;

#[derive(Default)]
struct ThrottleState {
    last_sent: Option<Instant>,
    pending: Option<Value>,
    timer: Option<JoinHandle<()>>,
    closed: bool,
}

/// Leading + trailing throttle.
///
/// The first event of a burst goes out immediately; later events inside
/// the window replace each other and the last one is delivered when the
/// window closes.
struct Throttle {
    window: Duration,
    deliver: Deliver,
    state: Mutex<ThrottleState>,
}

impl Throttle {
    fn new(window: Duration, deliver: Deliver) -> Self {
        Self {
            window,
            deliver,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    fn offer(self: &Arc<Self>, value: Value) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let window_open = state
            .last_sent
            .map(|at| now.duration_since(at) >= self.window)
            .unwrap_or(true);
        if window_open && state.timer.is_none() {
            state.last_sent = Some(now);
            drop(state);
            (self.deliver)(value);
            return;
        }

        state.pending = Some(value);
        if state.timer.is_some() {
            return;
        }

        let wait = state
            .last_sent
            .map(|at| self.window.saturating_sub(now.duration_since(at)))
            .unwrap_or_default();
        match Handle::try_current() {
            Ok(handle) => {
                let throttle = Arc::clone(self);
                state.timer = Some(handle.spawn(async move {
                    tokio::time::sleep(wait).await;
                    throttle.flush();
                }));
            }
            Err(_) => {
                // No runtime to defer on, deliver inline
                let pending = state.pending.take();
                state.last_sent = Some(now);
                drop(state);
                if let Some(value) = pending {
                    (self.deliver)(value);
                }
            }
        }
    }

    fn flush(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.timer = None;
            if state.closed {
                return;
            }
            state.last_sent = Some(Instant::now());
            state.pending.take()
        };
        if let Some(value) = pending {
            (self.deliver)(value);
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

struct LiveConnection {
    handle: ConnectionHandle,
    stats: Arc<ConnectionStats>,
    throttle: Arc<Throttle>,
    subscription: Subscription,
    health_task: Option<JoinHandle<()>>,
}

impl LiveConnection {
    fn snapshot(&self) -> ConnectionHandle {
        let mut handle = self.handle.clone();
        handle.last_data_flow = self.stats.last_flow_ms();
        handle
    }

    fn sever(mut self) {
        self.subscription.unsubscribe();
        self.throttle.close();
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
    }
}

/// Owner of every live connection
pub struct ConnectionManager {
    settings: ConnectionSettings,
    connections: Mutex<HashMap<String, LiveConnection>>,
    counters: Arc<Counters>,
    throughput: Arc<Mutex<ThroughputSample>>,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            connections: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
            throughput: Arc::new(Mutex::new(ThroughputSample::new())),
            metrics_task: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Wire `source.source_port` to `target.target_port`.
    ///
    /// An existing connection with the same id is replaced.
    pub fn create_connection(
        &self,
        id: &str,
        source: &MacroNode,
        source_port: &str,
        target: &MacroNode,
        target_port: &str,
    ) -> Result<ConnectionHandle> {
        if self.is_destroyed() {
            return Err(MacroEngineError::ManagerDestroyed);
        }

        let output = source
            .ports()
            .output(source_port)
            .cloned()
            .ok_or_else(|| MacroEngineError::PortNotFound {
                node_id: source.id.clone(),
                port: source_port.to_string(),
            })?;
        let sink = target
            .ports()
            .input(target_port)
            .cloned()
            .ok_or_else(|| MacroEngineError::PortNotFound {
                node_id: target.id.clone(),
                port: target_port.to_string(),
            })?;

        if self.disconnect_connection(id) {
            log::debug!("Replaced existing connection '{}'", id);
        }

        let stats = Arc::new(ConnectionStats::new());
        let throttle = Arc::new(Throttle::new(
            self.settings.throttle_window(),
            self.deliver_fn(id, sink, stats.clone()),
        ));

        let subscription = {
            let stats = stats.clone();
            let throttle = throttle.clone();
            output.subscribe(move |value| {
                stats.mark_flow();
                throttle.offer(value.clone());
            })
        };

        let handle = ConnectionHandle {
            id: id.to_string(),
            source: Endpoint::new(&source.id, source_port),
            target: Endpoint::new(&target.id, target_port),
            created: now_ms(),
            last_data_flow: None,
        };

        let live = LiveConnection {
            handle: handle.clone(),
            health_task: self.spawn_health_check(id, stats.clone()),
            stats,
            throttle,
            subscription,
        };
        self.connections.lock().insert(id.to_string(), live);
        self.counters.total_connections.fetch_add(1, Ordering::SeqCst);
        self.counters.active_connections.fetch_add(1, Ordering::SeqCst);
        self.ensure_metrics_task();

        log::debug!(
            "Connected '{}': {}.{} -> {}.{}",
            id,
            source.id,
            source_port,
            target.id,
            target_port
        );
        Ok(handle)
    }

    /// Sever a connection. Returns false if the id was unknown.
    pub fn disconnect_connection(&self, id: &str) -> bool {
        let removed = self.connections.lock().remove(id);
        match removed {
            Some(live) => {
                live.sever();
                self.counters.decrement_active();
                log::debug!("Disconnected '{}'", id);
                true
            }
            None => false,
        }
    }

    pub fn get_connection(&self, id: &str) -> Option<ConnectionHandle> {
        self.connections.lock().get(id).map(LiveConnection::snapshot)
    }

    /// All live connections, ordered by id
    pub fn get_all_connections(&self) -> Vec<ConnectionHandle> {
        let mut all: Vec<_> = self
            .connections
            .lock()
            .values()
            .map(LiveConnection::snapshot)
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn get_connection_health(&self, id: &str) -> Option<ConnectionHealth> {
        let connections = self.connections.lock();
        let live = connections.get(id)?;
        let stats = &live.stats;

        let silence = stats.silence();
        let events = stats.events.load(Ordering::SeqCst);
        let latency_us = stats.latency_us.load(Ordering::SeqCst);
        let age = stats.created_at.elapsed().as_secs_f64();

        Some(ConnectionHealth {
            connection_id: id.to_string(),
            healthy: silence <= self.settings.unhealthy_after(),
            last_data_flow: stats.last_flow_ms(),
            silence_ms: silence.as_millis() as u64,
            latency_ms: if events > 0 {
                latency_us as f64 / events as f64 / 1000.0
            } else {
                0.0
            },
            throughput_hz: if age > 0.0 { events as f64 / age } else { 0.0 },
            event_count: events,
            error_count: stats.errors.load(Ordering::SeqCst),
        })
    }

    pub fn get_metrics(&self) -> ConnectionMetrics {
        let events = self.counters.events.load(Ordering::SeqCst);
        let active = self.counters.active_connections.load(Ordering::SeqCst);
        let total_latency_ms = self.counters.latency_us.load(Ordering::SeqCst) as f64 / 1000.0;
        let throughput_hz = self.throughput.lock().hz;

        ConnectionMetrics {
            total_connections: self.counters.total_connections.load(Ordering::SeqCst),
            active_connections: active,
            total_events: events,
            error_count: self.counters.errors.load(Ordering::SeqCst),
            total_latency_ms,
            average_latency_ms: if events > 0 {
                total_latency_ms / events as f64
            } else {
                0.0
            },
            throughput_hz,
            memory_usage_bytes: active * CONNECTION_MEMORY_BYTES
                + (throughput_hz * BYTES_PER_EVENT_HZ) as u64,
            cpu_usage_percent: active as f64 * CPU_PERCENT_PER_CONNECTION
                + throughput_hz / 1000.0 * CPU_PERCENT_PER_KHZ,
        }
    }

    /// Sever every connection, stop all timers and reset metrics.
    ///
    /// The manager refuses new connections afterwards.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        let severed = self.sever_all();
        self.counters.reset();
        *self.throughput.lock() = ThroughputSample::new();
        log::info!("Connection manager destroyed ({} connections severed)", severed);
    }

    fn sever_all(&self) -> usize {
        let drained: Vec<LiveConnection> = self.connections.lock().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        for live in drained {
            live.sever();
        }
        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }
        count
    }

    fn deliver_fn(&self, id: &str, sink: InputSink, stats: Arc<ConnectionStats>) -> Deliver {
        let counters = self.counters.clone();
        let id = id.to_string();
        Box::new(move |value| {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| sink.push(value)));
            let elapsed_us = started.elapsed().as_micros() as u64;

            stats.events.fetch_add(1, Ordering::SeqCst);
            stats.latency_us.fetch_add(elapsed_us, Ordering::SeqCst);
            counters.events.fetch_add(1, Ordering::SeqCst);
            counters.latency_us.fetch_add(elapsed_us, Ordering::SeqCst);

            let failure = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "target panicked".to_string(),
            };
            stats.errors.fetch_add(1, Ordering::SeqCst);
            counters.errors.fetch_add(1, Ordering::SeqCst);
            log::warn!("Connection '{}' dropped an event: {}", id, failure);
        })
    }

    fn spawn_health_check(&self, id: &str, stats: Arc<ConnectionStats>) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let interval = self.settings.health_check_interval();
        let threshold = self.settings.unhealthy_after();
        let id = id.to_string();

        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let silence = stats.silence();
                let healthy = silence <= threshold;
                let was_healthy = stats.healthy.swap(healthy, Ordering::SeqCst);
                if was_healthy != healthy {
                    if healthy {
                        log::info!("Connection '{}' recovered", id);
                    } else {
                        log::warn!(
                            "Connection '{}' unhealthy: no data for {}ms",
                            id,
                            silence.as_millis()
                        );
                    }
                }
            }
        }))
    }

    fn ensure_metrics_task(&self) {
        let mut task = self.metrics_task.lock();
        if task.is_some() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let counters = self.counters.clone();
        let throughput = self.throughput.clone();
        let tick = self.settings.metrics_tick();
        *task = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let events = counters.events.load(Ordering::SeqCst);
                let mut sample = throughput.lock();
                let elapsed = sample.at.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    sample.hz = events.saturating_sub(sample.events) as f64 / elapsed;
                }
                sample.at = Instant::now();
                sample.events = events;
            }
        }));
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionSettings::default())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.sever_all();
    }
}
