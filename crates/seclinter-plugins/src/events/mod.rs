//! Typed publish/subscribe for plugin lifecycle notifications.
//!
//! Delivery is synchronous and guarded: a listener that errors or panics is
//! logged and skipped, and never affects the emitter or other listeners.
//! Registration has set semantics keyed on the listener handle.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

use crate::manifest::PluginMeta;

const EVENTS_TARGET: &str = "seclinter_plugins::events";

/// Kind of a lifecycle event; listeners subscribe per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginEventKind {
    /// A plugin was registered.
    Loaded,
    /// A plugin's `init` completed.
    Initialized,
    /// A scan call is about to start.
    ScanStarted,
    /// A scan call succeeded.
    ScanCompleted,
    /// A scan call failed.
    ScanError,
    /// A plugin was removed.
    Unloaded,
    /// A plugin crossed the error threshold.
    Error,
}

/// Event-specific data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Carries the metadata of the loaded plugin.
    Loaded {
        /// Plugin metadata.
        meta: PluginMeta,
    },
    /// No extra data.
    Initialized,
    /// No extra data.
    ScanStarted,
    /// Number of findings the plugin returned.
    ScanCompleted {
        /// Finding count.
        count: usize,
    },
    /// Failure message.
    ScanError {
        /// Failure description.
        message: String,
    },
    /// No extra data.
    Unloaded,
    /// The last error and the cumulative error count.
    Error {
        /// Last failure description.
        message: String,
        /// Consecutive errors recorded.
        error_count: u32,
    },
}

impl EventPayload {
    /// Returns the kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> PluginEventKind {
        match self {
            Self::Loaded { .. } => PluginEventKind::Loaded,
            Self::Initialized => PluginEventKind::Initialized,
            Self::ScanStarted => PluginEventKind::ScanStarted,
            Self::ScanCompleted { .. } => PluginEventKind::ScanCompleted,
            Self::ScanError { .. } => PluginEventKind::ScanError,
            Self::Unloaded => PluginEventKind::Unloaded,
            Self::Error { .. } => PluginEventKind::Error,
        }
    }
}

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEvent {
    plugin: String,
    timestamp: OffsetDateTime,
    payload: EventPayload,
}

impl PluginEvent {
    /// Creates an event stamped with the current UTC time.
    #[must_use]
    pub fn now(plugin: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            plugin: plugin.into(),
            timestamp: OffsetDateTime::now_utc(),
            payload,
        }
    }

    /// Name of the plugin concerned.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        self.plugin.as_str()
    }

    /// When the event was raised.
    #[must_use]
    pub const fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    /// Event data.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> PluginEventKind {
        self.payload.kind()
    }
}

/// Error a listener may return; it is logged and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    /// Creates a listener error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

type ListenerFn = dyn Fn(&PluginEvent) -> Result<(), ListenerError> + Send + Sync;

/// A cloneable listener handle. Clones compare equal, so the same handle
/// can later be passed to [`EventBus::off`].
#[derive(Clone)]
pub struct EventListener(Arc<ListenerFn>);

impl EventListener {
    /// Wraps a fallible callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&PluginEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Wraps an infallible callback.
    pub fn infallible<F>(callback: F) -> Self
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        Self::new(move |event| {
            callback(event);
            Ok(())
        })
    }

    fn call(&self, event: &PluginEvent) -> Result<(), ListenerError> {
        (self.0)(event)
    }
}

impl PartialEq for EventListener {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EventListener {}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventListener")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Synchronous event bus.
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<PluginEventKind, Vec<EventListener>>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `kind`. Registering twice has no effect.
    pub fn on(&self, kind: PluginEventKind, listener: EventListener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let registered = listeners.entry(kind).or_default();
        if !registered.contains(&listener) {
            registered.push(listener);
        }
    }

    /// Removes `listener` from `kind`. Unknown listeners are ignored.
    pub fn off(&self, kind: PluginEventKind, listener: &EventListener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(registered) = listeners.get_mut(&kind) {
            registered.retain(|candidate| candidate != listener);
        }
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: PluginEventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to a snapshot of the listeners for its kind.
    pub fn emit(&self, event: &PluginEvent) {
        let snapshot: Vec<EventListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.call(event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(
                    target: EVENTS_TARGET,
                    plugin = event.plugin(),
                    kind = ?event.kind(),
                    %error,
                    "event listener failed"
                ),
                Err(_) => warn!(
                    target: EVENTS_TARGET,
                    plugin = event.plugin(),
                    kind = ?event.kind(),
                    "event listener panicked"
                ),
            }
        }
    }
}
