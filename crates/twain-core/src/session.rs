//! Session configuration and the client facade.
//!
//! [`TwainContext`] is the one object a client needs: it owns the
//! dispatcher thread, the listener registry and the shared session status,
//! and tears everything down when dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::codec::Layout;
use crate::dispatcher::{Dispatcher, Payload};
use crate::dsm::Dsm;
use crate::error::{Result, TwainError};
use crate::events::{ObserverRegistry, SessionSnapshot, SubscriptionId, TwainObserver};
use crate::manager::SourceManager;
use crate::protocol::{Identity, Version, DF_APP2, DG_CONTROL, DG_IMAGE};
use crate::source::SharedSession;
use crate::state::TwainState;

/// Application identity announced to the DSM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub manufacturer: String,
    pub product_family: String,
    pub product_name: String,
    pub version_info: String,
    pub version_major: u16,
    pub version_minor: u16,
    pub language: u16,
    pub country: u16,
    pub protocol_major: u16,
    pub protocol_minor: u16,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            manufacturer: "twain-rs".to_string(),
            product_family: "twain-core".to_string(),
            product_name: "twain-client".to_string(),
            version_info: env!("CARGO_PKG_VERSION").to_string(),
            version_major: 1,
            version_minor: 9,
            language: 17,
            country: 1,
            protocol_major: 1,
            protocol_minor: 9,
        }
    }
}

impl ApplicationConfig {
    pub fn to_identity(&self) -> Identity {
        Identity {
            id: 0,
            version: Version {
                major: self.version_major,
                minor: self.version_minor,
                language: self.language,
                country: self.country,
                info: self.version_info.clone(),
            },
            protocol_major: self.protocol_major,
            protocol_minor: self.protocol_minor,
            supported_groups: DG_CONTROL | DG_IMAGE | DF_APP2,
            manufacturer: self.manufacturer.clone(),
            product_family: self.product_family.clone(),
            product_name: self.product_name.clone(),
        }
    }
}

/// Configuration for a TWAIN session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Show the source's own user interface on enable.
    pub show_ui: bool,
    /// `TWSX_*` mechanism negotiated before enabling.
    pub transfer_mechanism: Option<u16>,
    /// `TWFF_*` format for file transfers.
    pub image_file_format: Option<u16>,
    /// Target directory for file transfers, the system temp dir if unset.
    pub file_transfer_dir: Option<PathBuf>,
    pub enumeration_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    /// Read UINT16 array and enumeration items at a 4-byte stride.
    pub legacy_uint16_stride: bool,
    /// Native parent window handle, 0 when unknown.
    pub parent_window: u64,
    pub application: ApplicationConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            show_ui: true,
            transfer_mechanism: None,
            image_file_format: None,
            file_transfer_dir: None,
            enumeration_timeout_ms: 500,
            startup_timeout_ms: 10_000,
            legacy_uint16_stride: false,
            parent_window: 0,
            application: ApplicationConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn file_transfer_dir(&self) -> PathBuf {
        self.file_transfer_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn layout(&self) -> Layout {
        Layout {
            legacy_uint16_stride: self.legacy_uint16_stride,
        }
    }

    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_millis(self.enumeration_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Client facade over one TWAIN session.
pub struct TwainContext {
    config: SessionConfig,
    dispatcher: Dispatcher,
    observers: Arc<ObserverRegistry>,
    shared: Arc<SharedSession>,
}

impl TwainContext {
    /// Spawn the owning thread, open the DSM there and wait for it.
    #[instrument(skip(dsm, config))]
    pub fn start(dsm: Arc<dyn Dsm>, config: SessionConfig) -> Result<Self> {
        let observers = Arc::new(ObserverRegistry::new());
        let shared = Arc::new(SharedSession::new());

        let init = {
            let observers = Arc::clone(&observers);
            let shared = Arc::clone(&shared);
            let config = config.clone();
            move || {
                let mut manager =
                    SourceManager::new(dsm, config.application.to_identity(), observers, shared);
                let source = manager.source_mut();
                source.set_show_ui(config.show_ui);
                source.set_parent(config.parent_window);
                source.set_file_transfer_dir(config.file_transfer_dir());
                source.set_layout(config.layout());
                source.set_preferred_transfer(config.transfer_mechanism, config.image_file_format);
                manager.open(config.parent_window)?;
                Ok(manager)
            }
        };
        let dispatcher = Dispatcher::spawn(init, config.startup_timeout())?;
        info!("TWAIN session started");
        Ok(Self {
            config,
            dispatcher,
            observers,
            shared,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self, observer: Arc<dyn TwainObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Latest session status.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// Session status after every command posted so far has run.
    pub fn sync(&self) -> Result<SessionSnapshot> {
        self.dispatcher.deliver_state(self.config.startup_timeout())
    }

    fn check_ready(&self) -> Result<()> {
        let actual = self.snapshot().state;
        if actual != TwainState::SourceManagerOpen {
            return Err(TwainError::WrongState {
                expected: TwainState::SourceManagerOpen,
                actual,
            });
        }
        Ok(())
    }

    /// Show the DSM selection dialog.
    pub fn select(&self) -> Result<()> {
        self.check_ready()?;
        self.dispatcher.post(Payload::Select).map(drop)
    }

    pub fn select_by_name(&self, name: &str) -> Result<()> {
        self.check_ready()?;
        self.dispatcher
            .post(Payload::SelectByName(name.to_string()))
            .map(drop)
    }

    /// Every source, waiting up to the enumeration timeout.
    pub fn identities(&self) -> Result<Vec<Identity>> {
        self.check_ready()?;
        self.dispatcher
            .identities(self.config.enumeration_timeout())
    }

    pub fn device_names(&self) -> Result<Vec<String>> {
        Ok(self
            .identities()?
            .into_iter()
            .map(|identity| identity.product_name)
            .collect())
    }

    /// Open, negotiate and enable the selected source. Images arrive as
    /// listener events.
    pub fn acquire(&self) -> Result<()> {
        self.check_ready()?;
        self.dispatcher.post(Payload::Acquire).map(drop)
    }

    /// Ask the running transfer loop to stop before the next image.
    pub fn set_cancel(&self, cancel: bool) {
        self.shared.set_cancel(cancel);
    }

    /// Route an OS message to the source.
    pub fn post_event(&self, message: u64) -> Result<()> {
        self.dispatcher.post_event(message)
    }

    /// Close everything on the owning thread and join it.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsm::MockDsm;
    use crate::events::TwainEvent;
    use crate::protocol::{TWFF_PNG, TWSX_FILE, TWSX_MEMORY};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TwainEvent>>);

    impl TwainObserver for Recorder {
        fn on_event(&self, event: &TwainEvent, _snapshot: &SessionSnapshot) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn count(&self, kind: &str) -> usize {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.kind_name() == kind)
                .count()
        }
    }

    fn start(mock: &Arc<MockDsm>, config: SessionConfig) -> (TwainContext, Arc<Recorder>) {
        let context = TwainContext::start(mock.clone(), config).unwrap();
        let recorder = Arc::new(Recorder::default());
        context.subscribe(recorder.clone());
        (context, recorder)
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.show_ui);
        assert_eq!(config.enumeration_timeout_ms, 500);
        assert_eq!(config.startup_timeout_ms, 10_000);
        assert_eq!(config.application.protocol_major, 1);
        assert_eq!(config.application.protocol_minor, 9);
        assert_eq!(config.file_transfer_dir(), std::env::temp_dir());
        assert!(!config.layout().legacy_uint16_stride);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let config = SessionConfig {
            show_ui: false,
            transfer_mechanism: Some(TWSX_MEMORY),
            legacy_uint16_stride: true,
            file_transfer_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(SessionConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = toml::from_str("show_ui = false\n[application]\nproduct_name = \"Scan Tool\"\n").unwrap();
        assert!(!config.show_ui);
        assert_eq!(config.application.product_name, "Scan Tool");
        assert_eq!(config.application.manufacturer, "twain-rs");
        assert_eq!(config.enumeration_timeout_ms, 500);
    }

    #[test]
    fn test_start_opens_manager() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (context, _) = start(&mock, SessionConfig::default());
        assert_eq!(context.snapshot().state, TwainState::SourceManagerOpen);
        assert_eq!(context.device_names().unwrap(), vec!["Flatbed"]);
        assert!(mock.is_dsm_open());
    }

    #[test]
    fn test_acquire_without_ui_finishes_job() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed", "Camera"]));
        let config = SessionConfig {
            show_ui: false,
            ..Default::default()
        };
        let (context, recorder) = start(&mock, config);
        context.select_by_name("Camera").unwrap();
        context.acquire().unwrap();
        context.post_event(0).unwrap();
        let snapshot = context.sync().unwrap();

        assert_eq!(snapshot.state, TwainState::SourceManagerOpen);
        assert!(snapshot.is_finished());
        assert_eq!(snapshot.source.unwrap().product_name, "Camera");
        assert_eq!(recorder.count("deviceSelected"), 1);
        assert_eq!(recorder.count("imageAcquired"), 1);
        assert_eq!(recorder.count("exception"), 0);
    }

    #[test]
    fn test_configured_file_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let config = SessionConfig {
            show_ui: false,
            transfer_mechanism: Some(TWSX_FILE),
            image_file_format: Some(TWFF_PNG),
            file_transfer_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let (context, recorder) = start(&mock, config);
        context.acquire().unwrap();
        context.post_event(0).unwrap();
        context.sync().unwrap();

        let events = recorder.0.lock().unwrap();
        let path = events
            .iter()
            .find_map(|e| match e {
                TwainEvent::FileReady { path } => Some(path.clone()),
                _ => None,
            })
            .unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }

    #[test]
    fn test_caller_side_state_check() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (context, _) = start(&mock, SessionConfig::default());
        context.acquire().unwrap();
        context.sync().unwrap();
        mock.clear_calls();

        assert!(matches!(
            context.select_by_name("Flatbed"),
            Err(TwainError::WrongState {
                actual: TwainState::SourceEnabled,
                ..
            })
        ));
        assert!(context.identities().is_err());
        context.sync().unwrap();
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (context, _) = start(&mock, SessionConfig::default());
        context.set_cancel(true);
        assert!(context.snapshot().cancel);
        context.set_cancel(false);
        assert!(!context.snapshot().cancel);
    }

    #[test]
    fn test_shutdown_and_drop() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        {
            let (context, _) = start(&mock, SessionConfig::default());
            context.acquire().unwrap();
            context.sync().unwrap();
        }
        assert!(!mock.is_dsm_open());
        assert_eq!(mock.open_source_id(), None);

        let (context, _) = start(&mock, SessionConfig::default());
        context.shutdown();
        assert!(matches!(context.acquire(), Err(TwainError::WrongState { .. })));
        assert!(matches!(context.post_event(0), Err(TwainError::Disconnected)));
    }
}
