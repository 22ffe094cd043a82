//! Listener system for presentation decoupling.
//!
//! The owning thread publishes every acquisition milestone to the
//! registered observers together with a [`SessionSnapshot`], so a CLI or
//! GUI never has to reach into the source itself.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::protocol::{Identity, ImageMemXfer};
use crate::source::Source;
use crate::state::TwainState;
use crate::transfer::native::BitmapInfoHeader;

/// State of the session as seen by listeners and caller threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: TwainState,
    pub previous: TwainState,
    pub busy: bool,
    pub cancel: bool,
    /// Currently selected data source.
    pub source: Option<Identity>,
}

impl SessionSnapshot {
    /// True right after the source was closed, which ends a job.
    pub fn is_finished(&self) -> bool {
        self.previous == TwainState::SourceOpen && self.state == TwainState::SourceManagerOpen
    }
}

/// Events emitted by the source and the manager.
#[derive(Debug, Clone)]
pub enum TwainEvent {
    Info(String),
    /// An error reached an outer boundary.
    Exception { message: String },
    DeviceSelected { identity: Identity },
    /// A native transfer produced a device independent bitmap.
    ImageAcquired {
        header: BitmapInfoHeader,
        dib: Vec<u8>,
    },
    FileReady { path: PathBuf },
    MemoryChunkReady { info: ImageMemXfer, data: Vec<u8> },
    /// The source is open and about to be enabled.
    NegotiateCapabilities,
    StateChanged { from: TwainState, to: TwainState },
}

impl TwainEvent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TwainEvent::Info(_) => "info",
            TwainEvent::Exception { .. } => "exception",
            TwainEvent::DeviceSelected { .. } => "deviceSelected",
            TwainEvent::ImageAcquired { .. } => "imageAcquired",
            TwainEvent::FileReady { .. } => "fileReady",
            TwainEvent::MemoryChunkReady { .. } => "memoryChunkReady",
            TwainEvent::NegotiateCapabilities => "capabilityNegotiationRequested",
            TwainEvent::StateChanged { .. } => "stateChanged",
        }
    }
}

impl fmt::Display for TwainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwainEvent::Info(message) => write!(f, "info: {}", message),
            TwainEvent::Exception { message } => write!(f, "exception: {}", message),
            TwainEvent::DeviceSelected { identity } => {
                write!(f, "device selected: {}", identity.product_name)
            }
            TwainEvent::ImageAcquired { header, dib } => write!(
                f,
                "image acquired: {}x{} @ {} bpp ({} bytes)",
                header.width,
                header.height.abs(),
                header.bit_count,
                dib.len()
            ),
            TwainEvent::FileReady { path } => write!(f, "file ready: {}", path.display()),
            TwainEvent::MemoryChunkReady { info, .. } => write!(
                f,
                "memory chunk: {} bytes, rows {}..{}",
                info.bytes_written,
                info.y_offset,
                info.y_offset + info.rows
            ),
            TwainEvent::NegotiateCapabilities => write!(f, "capability negotiation requested"),
            TwainEvent::StateChanged { from, to } => write!(f, "state: {} -> {}", from, to),
        }
    }
}

/// Result of the capability negotiation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Proceed,
    /// Close the source instead of enabling it.
    Cancel,
}

/// Observer trait for receiving session events.
///
/// Callbacks run on the owning thread.
pub trait TwainObserver: Send + Sync {
    fn on_event(&self, event: &TwainEvent, snapshot: &SessionSnapshot);

    /// Negotiate capabilities on the open source before it is enabled.
    fn negotiate(&self, _source: &Source) -> Negotiation {
        Negotiation::Proceed
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl TwainObserver for NullObserver {
    fn on_event(&self, _event: &TwainEvent, _snapshot: &SessionSnapshot) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TwainObserver for TracingObserver {
    fn on_event(&self, event: &TwainEvent, snapshot: &SessionSnapshot) {
        match event {
            TwainEvent::Exception { message } => {
                tracing::error!(state = %snapshot.state, "{}", message);
            }
            TwainEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "State changed");
            }
            TwainEvent::MemoryChunkReady { .. } => {
                tracing::debug!(kind = event.kind_name(), "{}", event);
            }
            _ => tracing::info!(kind = event.kind_name(), "{}", event),
        }
    }
}

/// Handle returned by [`ObserverRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Strongly held listeners, in subscription order.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(SubscriptionId, Arc<dyn TwainObserver>)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn TwainObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current listeners. Callers iterate over the copy so a callback may
    /// subscribe or unsubscribe without deadlocking.
    pub fn observers(&self) -> Vec<Arc<dyn TwainObserver>> {
        self.lock().iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    pub fn emit(&self, event: &TwainEvent, snapshot: &SessionSnapshot) {
        for observer in self.observers() {
            observer.on_event(event, snapshot);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Arc<dyn TwainObserver>)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl TwainObserver for Recorder {
        fn on_event(&self, event: &TwainEvent, _snapshot: &SessionSnapshot) {
            self.0.lock().unwrap().push(event.kind_name().to_string());
        }
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let registry = ObserverRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let id = registry.subscribe(recorder.clone());
        registry.subscribe(Arc::new(NullObserver));
        assert_eq!(registry.len(), 2);

        registry.emit(&TwainEvent::Info("hello".into()), &SessionSnapshot::default());
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.emit(&TwainEvent::NegotiateCapabilities, &SessionSnapshot::default());

        assert_eq!(*recorder.0.lock().unwrap(), vec!["info".to_string()]);
    }

    #[test]
    fn test_snapshot_is_finished() {
        let mut snapshot = SessionSnapshot {
            previous: TwainState::SourceOpen,
            state: TwainState::SourceManagerOpen,
            ..Default::default()
        };
        assert!(snapshot.is_finished());
        snapshot.previous = TwainState::SourceEnabled;
        assert!(!snapshot.is_finished());
    }

    #[test]
    fn test_event_display() {
        let event = TwainEvent::StateChanged {
            from: TwainState::SourceOpen,
            to: TwainState::SourceEnabled,
        };
        assert_eq!(event.kind_name(), "stateChanged");
        assert!(event.to_string().contains("Source Enabled"));
    }
}
