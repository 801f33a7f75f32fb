//! Minimal push-stream primitives used to wire macro ports
//!
//! An `OutputStream` fans emitted values out to its observers, an
//! `InputSink` accepts pushed values. Throttling and error isolation are
//! layered on top by the connection manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;

type Observer = Arc<dyn Fn(&Value) + Send + Sync>;

struct StreamInner {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Observer)>>,
}

/// A subscribable source of values
#[derive(Clone)]
pub struct OutputStream {
    inner: Arc<StreamInner>,
}

impl OutputStream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                next_id: AtomicU64::new(0),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register an observer. It stays attached until the returned
    /// subscription is dropped or unsubscribed.
    pub fn subscribe(&self, observer: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().push((id, Arc::new(observer)));
        Subscription {
            id,
            stream: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a value to every current observer, in subscription order
    pub fn emit(&self, value: Value) {
        // Observers run outside the lock so they may subscribe or emit
        let observers: Vec<Observer> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(&value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.lock().len()
    }
}

impl Default for OutputStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Detaches its observer when dropped
pub struct Subscription {
    id: u64,
    stream: Weak<StreamInner>,
}

impl Subscription {
    /// Detach now; later calls are no-ops
    pub fn unsubscribe(&mut self) {
        if let Some(inner) = self.stream.upgrade() {
            inner.observers.lock().retain(|(id, _)| *id != self.id);
        }
        self.stream = Weak::new();
    }

    pub fn is_active(&self) -> bool {
        self.stream
            .upgrade()
            .map(|inner| inner.observers.lock().iter().any(|(id, _)| *id == self.id))
            .unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

type Handler = Arc<dyn Fn(Value) -> Result<()> + Send + Sync>;

/// A push target for values
#[derive(Clone)]
pub struct InputSink {
    handler: Handler,
}

impl InputSink {
    pub fn new(handler: impl Fn(Value) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// A sink that re-emits everything on `stream`
    pub fn forward_to(stream: OutputStream) -> Self {
        Self::new(move |value| {
            stream.emit(value);
            Ok(())
        })
    }

    /// Push a value into the sink
    pub fn push(&self, value: Value) -> Result<()> {
        (self.handler)(value)
    }
}
