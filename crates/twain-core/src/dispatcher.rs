//! Cross-thread command dispatch.
//!
//! Every protocol call runs on one owning thread. Callers register a
//! payload under a fresh token and post `(token, kind)` to that thread's
//! queue; the thread executes commands strictly in post order.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{Result, TwainError};
use crate::events::SessionSnapshot;
use crate::manager::SourceManager;
use crate::protocol::Identity;

/// Fixed set of commands the owning thread executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    DeliverState = 0,
    Select = 1,
    Identities = 2,
    SelectByName = 3,
    Acquire = 4,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::DeliverState => write!(f, "DeliverState"),
            CommandKind::Select => write!(f, "Select"),
            CommandKind::Identities => write!(f, "Identities"),
            CommandKind::SelectByName => write!(f, "SelectByName"),
            CommandKind::Acquire => write!(f, "Acquire"),
        }
    }
}

/// Data a command carries to the owning thread.
pub enum Payload {
    /// Reply with the snapshot once every earlier command ran.
    DeliverState(SyncSender<SessionSnapshot>),
    Select,
    Identities(SyncSender<Result<Vec<Identity>>>),
    SelectByName(String),
    Acquire,
}

impl Payload {
    pub fn kind(&self) -> CommandKind {
        match self {
            Payload::DeliverState(_) => CommandKind::DeliverState,
            Payload::Select => CommandKind::Select,
            Payload::Identities(_) => CommandKind::Identities,
            Payload::SelectByName(_) => CommandKind::SelectByName,
            Payload::Acquire => CommandKind::Acquire,
        }
    }
}

enum QueueItem {
    Command { token: u64, kind: CommandKind },
    /// OS message from the external pump.
    OsEvent(u64),
    Shutdown,
}

/// Payloads waiting for the owning thread, keyed by token.
#[derive(Default)]
pub struct TokenTable {
    next: AtomicU64,
    payloads: Mutex<HashMap<u64, Payload>>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` under a fresh token. Tokens start at 1.
    pub fn register(&self, payload: Payload) -> u64 {
        let token = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().insert(token, payload);
        token
    }

    pub fn take(&self, token: u64) -> Option<Payload> {
        self.lock().remove(&token)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Payload>> {
        self.payloads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller-side handle to the owning thread.
pub struct Dispatcher {
    sender: Mutex<Sender<QueueItem>>,
    tokens: Arc<TokenTable>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the owning thread. `init` runs on that thread and must return
    /// a manager with the DSM open.
    pub fn spawn<F>(init: F, startup_timeout: Duration) -> Result<Self>
    where
        F: FnOnce() -> Result<SourceManager> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let tokens = Arc::new(TokenTable::new());
        let loop_tokens = Arc::clone(&tokens);

        let handle = thread::Builder::new()
            .name("twain-dispatch".into())
            .spawn(move || {
                let manager = match init() {
                    Ok(manager) => {
                        let _ = ready_tx.send(Ok(()));
                        manager
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                DispatchLoop {
                    manager,
                    receiver,
                    tokens: loop_tokens,
                }
                .run();
            })?;

        match ready_rx.recv_timeout(startup_timeout) {
            Ok(Ok(())) => {
                info!("Dispatcher ready");
                Ok(Self {
                    sender: Mutex::new(sender),
                    tokens,
                    thread: Mutex::new(Some(handle)),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => Err(TwainError::Timeout {
                timeout_ms: startup_timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(TwainError::Disconnected),
        }
    }

    /// Queue a command. Returns its token.
    pub fn post(&self, payload: Payload) -> Result<u64> {
        let kind = payload.kind();
        let token = self.tokens.register(payload);
        debug!(token, kind = %kind, "Posting command");
        if self.send(QueueItem::Command { token, kind }).is_err() {
            self.tokens.take(token);
            return Err(TwainError::Disconnected);
        }
        Ok(token)
    }

    /// Forward an OS message to the owning thread.
    pub fn post_event(&self, message: u64) -> Result<()> {
        self.send(QueueItem::OsEvent(message))
    }

    /// Every source, waiting at most `timeout` for the owning thread.
    pub fn identities(&self, timeout: Duration) -> Result<Vec<Identity>> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.post(Payload::Identities(tx))?;
        wait(&rx, timeout)?
    }

    /// Snapshot taken after every earlier command has run.
    pub fn deliver_state(&self, timeout: Duration) -> Result<SessionSnapshot> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.post(Payload::DeliverState(tx))?;
        wait(&rx, timeout)
    }

    pub fn pending_commands(&self) -> usize {
        self.tokens.len()
    }

    /// Tear down the session on the owning thread and join it.
    pub fn shutdown(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if self.send(QueueItem::Shutdown).is_err() {
            debug!("Owning thread already gone");
        }
        if handle.join().is_err() {
            error!("Owning thread panicked");
        }
    }

    fn send(&self, item: QueueItem) -> Result<()> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(item)
            .map_err(|_| TwainError::Disconnected)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wait<T>(rx: &Receiver<T>, timeout: Duration) -> Result<T> {
    rx.recv_timeout(timeout).map_err(|e| match e {
        RecvTimeoutError::Timeout => TwainError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        },
        RecvTimeoutError::Disconnected => TwainError::Disconnected,
    })
}

/// The owning thread's loop.
struct DispatchLoop {
    manager: SourceManager,
    receiver: Receiver<QueueItem>,
    tokens: Arc<TokenTable>,
}

impl DispatchLoop {
    fn run(mut self) {
        while let Ok(item) = self.receiver.recv() {
            match item {
                QueueItem::Command { token, kind } => {
                    let Some(payload) = self.tokens.take(token) else {
                        warn!(token, kind = %kind, "No payload for token");
                        continue;
                    };
                    if let Err(e) = self.execute(payload) {
                        self.manager.source().report(&e);
                    }
                }
                QueueItem::OsEvent(message) => {
                    if let Err(e) = self.manager.source_mut().handle_event(message) {
                        self.manager.source().report(&e);
                    }
                }
                QueueItem::Shutdown => break,
            }
        }
        self.teardown();
    }

    fn execute(&mut self, payload: Payload) -> Result<()> {
        debug!(kind = %payload.kind(), "Executing command");
        match payload {
            Payload::DeliverState(reply) => {
                let _ = reply.send(self.manager.source().snapshot());
            }
            Payload::Select => {
                self.manager.select_source()?;
            }
            Payload::Identities(reply) => {
                // The caller may have timed out already.
                let _ = reply.send(self.manager.identities());
            }
            Payload::SelectByName(name) => {
                self.manager.select_by_name(&name)?;
            }
            Payload::Acquire => self.manager.acquire()?,
        }
        Ok(())
    }

    fn teardown(&mut self) {
        info!("Shutting down session");
        if let Err(e) = self.manager.close() {
            self.manager.source().report(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsm::MockDsm;
    use crate::events::{ObserverRegistry, TwainEvent, TwainObserver};
    use crate::source::SharedSession;
    use crate::state::TwainState;

    #[derive(Default)]
    struct Selections(Mutex<Vec<String>>);

    impl TwainObserver for Selections {
        fn on_event(&self, event: &TwainEvent, _snapshot: &SessionSnapshot) {
            if let TwainEvent::DeviceSelected { identity } = event {
                self.0.lock().unwrap().push(identity.product_name.clone());
            }
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn spawn(mock: Arc<MockDsm>, observers: Arc<ObserverRegistry>) -> Dispatcher {
        Dispatcher::spawn(
            move || {
                let mut manager = SourceManager::new(
                    mock,
                    Identity::default(),
                    observers,
                    Arc::new(SharedSession::new()),
                );
                manager.open(0)?;
                Ok(manager)
            },
            TIMEOUT,
        )
        .unwrap()
    }

    #[test]
    fn test_tokens_are_unique_and_start_at_one() {
        let table = TokenTable::new();
        let a = table.register(Payload::Select);
        let b = table.register(Payload::Acquire);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(matches!(table.take(a), Some(Payload::Select)));
        assert!(table.take(a).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_identities_round_trip() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed", "Camera"]));
        let dispatcher = spawn(mock, Arc::new(ObserverRegistry::new()));
        let names: Vec<String> = dispatcher
            .identities(TIMEOUT)
            .unwrap()
            .into_iter()
            .map(|i| i.product_name)
            .collect();
        assert_eq!(names, vec!["Flatbed", "Camera"]);
        assert_eq!(dispatcher.pending_commands(), 0);
    }

    #[test]
    fn test_commands_run_in_post_order() {
        let names: Vec<String> = (0..20).map(|i| format!("Device {}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mock = Arc::new(MockDsm::scanner(&refs));
        let observers = Arc::new(ObserverRegistry::new());
        let selections = Arc::new(Selections::default());
        observers.subscribe(selections.clone());
        let dispatcher = Arc::new(spawn(mock, observers));

        let posters: Vec<_> = [0usize, 10]
            .into_iter()
            .map(|offset| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || {
                    for i in offset..offset + 10 {
                        dispatcher
                            .post(Payload::SelectByName(format!("Device {}", i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for poster in posters {
            poster.join().unwrap();
        }
        let snapshot = dispatcher.deliver_state(TIMEOUT).unwrap();
        assert_eq!(snapshot.state, TwainState::SourceManagerOpen);

        let observed = selections.0.lock().unwrap().clone();
        assert_eq!(observed.len(), 20);
        for offset in [0usize, 10] {
            let expected: Vec<String> = (offset..offset + 10)
                .map(|i| format!("Device {}", i))
                .collect();
            let seen: Vec<String> = observed
                .iter()
                .filter(|name| expected.contains(name))
                .cloned()
                .collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_failed_command_becomes_exception_event() {
        #[derive(Default)]
        struct Exceptions(Mutex<Vec<String>>);
        impl TwainObserver for Exceptions {
            fn on_event(&self, event: &TwainEvent, _snapshot: &SessionSnapshot) {
                if let TwainEvent::Exception { message } = event {
                    self.0.lock().unwrap().push(message.clone());
                }
            }
        }

        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let observers = Arc::new(ObserverRegistry::new());
        let exceptions = Arc::new(Exceptions::default());
        observers.subscribe(exceptions.clone());
        let dispatcher = spawn(mock, observers);

        dispatcher
            .post(Payload::SelectByName("Missing".into()))
            .unwrap();
        dispatcher.deliver_state(TIMEOUT).unwrap();
        let messages = exceptions.0.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Missing"));
    }

    #[test]
    fn test_os_events_drive_transfers() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let dispatcher = spawn(mock.clone(), Arc::new(ObserverRegistry::new()));
        dispatcher.post(Payload::Acquire).unwrap();
        dispatcher.post_event(0).unwrap();
        let snapshot = dispatcher.deliver_state(TIMEOUT).unwrap();
        assert_eq!(snapshot.state, TwainState::SourceEnabled);
        assert_eq!(mock.count_calls(crate::protocol::DAT_IMAGENATIVEXFER, crate::protocol::MSG_GET), 1);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let dispatcher = spawn(mock.clone(), Arc::new(ObserverRegistry::new()));
        dispatcher.post(Payload::Acquire).unwrap();
        dispatcher.shutdown();
        assert!(!mock.is_dsm_open());
        assert_eq!(mock.open_source_id(), None);
        assert!(matches!(
            dispatcher.post(Payload::Select),
            Err(TwainError::Disconnected)
        ));
        assert_eq!(dispatcher.pending_commands(), 0);
    }

    #[test]
    fn test_startup_failure_is_returned() {
        let mock = Arc::new(MockDsm::new());
        mock.script_failure(
            crate::protocol::DAT_PARENT,
            crate::protocol::MSG_OPENDSM,
            crate::protocol::TWCC_BUMMER,
        );
        let result = Dispatcher::spawn(
            move || {
                let mut manager = SourceManager::new(
                    mock,
                    Identity::default(),
                    Arc::new(ObserverRegistry::new()),
                    Arc::new(SharedSession::new()),
                );
                manager.open(0)?;
                Ok(manager)
            },
            TIMEOUT,
        );
        assert!(matches!(
            result,
            Err(TwainError::Protocol {
                condition: Some(crate::protocol::TWCC_BUMMER),
                ..
            })
        ));
    }
}
