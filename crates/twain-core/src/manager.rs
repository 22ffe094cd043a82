//! Source manager: DSM lifecycle, device enumeration and selection.
//!
//! The manager owns the single [`Source`] of the session. Selection and
//! enumeration mark the source busy for their duration.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::dsm::{Dsm, Link};
use crate::error::{Result, TwainError};
use crate::events::{ObserverRegistry, TwainEvent};
use crate::protocol::*;
use crate::source::{SharedSession, Source};
use crate::state::TwainState;

pub struct SourceManager {
    link: Arc<Link>,
    source: Source,
}

impl SourceManager {
    pub fn new(
        dsm: Arc<dyn Dsm>,
        app: Identity,
        observers: Arc<ObserverRegistry>,
        shared: Arc<SharedSession>,
    ) -> Self {
        let link = Arc::new(Link::new(dsm, app));
        let source = Source::new(Arc::clone(&link), observers, shared);
        Self { link, source }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Source {
        &mut self.source
    }

    pub fn state(&self) -> TwainState {
        self.source.state()
    }

    pub fn app_identity(&self) -> Identity {
        self.link.app_identity()
    }

    // ------------------------------------------------------------------
    // DSM lifecycle
    // ------------------------------------------------------------------

    /// `MSG_OPENDSM` with the parent window handle, then ask for the
    /// default source.
    #[instrument(skip(self))]
    pub fn open(&mut self, parent: u64) -> Result<()> {
        self.source.check_state(TwainState::SourceManagerLoaded)?;
        let mut data = HandleRecord(parent).to_bytes();
        self.link
            .call(None, DG_CONTROL, DAT_PARENT, MSG_OPENDSM, &mut data)?;
        self.source.set_state(TwainState::SourceManagerOpen);
        info!(app_id = self.link.app_identity().id, "Source manager open");

        let mut data = Identity::default().to_bytes();
        match self
            .link
            .call(None, DG_CONTROL, DAT_IDENTITY, MSG_GETDEFAULT, &mut data)
            .and_then(|_| Identity::from_bytes(&data))
        {
            Ok(identity) => {
                debug!(source = %identity.product_name, "Default source");
                self.source.set_identity(identity);
            }
            Err(e) => warn!(error = %e, "No default source"),
        }
        Ok(())
    }

    /// Disable and close any open source, then `MSG_CLOSEDSM`.
    #[instrument(skip(self))]
    pub fn close(&mut self) -> Result<()> {
        self.source.disable()?;
        self.source.close()?;
        if self.source.state() != TwainState::SourceManagerOpen {
            return Ok(());
        }
        let mut data = HandleRecord(0).to_bytes();
        self.link
            .call(None, DG_CONTROL, DAT_PARENT, MSG_CLOSEDSM, &mut data)?;
        self.source.set_state(TwainState::SourceManagerLoaded);
        info!("Source manager closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enumeration and selection
    // ------------------------------------------------------------------

    /// Run `f` with the source marked busy.
    fn with_busy<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.source.check_state(TwainState::SourceManagerOpen)?;
        self.source.set_busy(true);
        let result = f(self);
        self.source.set_busy(false);
        result
    }

    /// Every source the DSM knows. No sources is an empty list.
    #[instrument(skip(self))]
    pub fn identities(&mut self) -> Result<Vec<Identity>> {
        self.with_busy(|m| m.enumerate())
    }

    pub fn device_names(&mut self) -> Result<Vec<String>> {
        Ok(self
            .identities()?
            .into_iter()
            .map(|identity| identity.product_name)
            .collect())
    }

    fn enumerate(&self) -> Result<Vec<Identity>> {
        let mut identities = Vec::new();
        let mut msg = MSG_GETFIRST;
        loop {
            let mut data = Identity::default().to_bytes();
            match self
                .link
                .call(None, DG_CONTROL, DAT_IDENTITY, msg, &mut data)
            {
                Ok(Completion::EndOfList) => break,
                Ok(_) => identities.push(Identity::from_bytes(&data)?),
                Err(e) if e.condition() == Some(TWCC_NODS) => break,
                Err(e) => return Err(e),
            }
            msg = MSG_GETNEXT;
        }
        debug!(count = identities.len(), "Enumerated sources");
        Ok(identities)
    }

    /// Show the DSM selection dialog. `None` when the user cancelled.
    #[instrument(skip(self))]
    pub fn select_source(&mut self) -> Result<Option<Identity>> {
        self.with_busy(|m| {
            let mut data = m.source.identity().to_bytes();
            match m
                .link
                .call(None, DG_CONTROL, DAT_IDENTITY, MSG_USERSELECT, &mut data)
            {
                Ok(_) => {
                    let identity = Identity::from_bytes(&data)?;
                    m.select(identity.clone());
                    Ok(Some(identity))
                }
                Err(TwainError::Cancel) => {
                    info!("Source selection cancelled");
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Select the source whose product name is `name`.
    #[instrument(skip(self))]
    pub fn select_by_name(&mut self, name: &str) -> Result<Identity> {
        self.with_busy(|m| {
            let identity = m
                .enumerate()?
                .into_iter()
                .find(|identity| identity.product_name == name)
                .ok_or_else(|| TwainError::SourceNotFound(name.to_string()))?;
            m.select(identity.clone());
            Ok(identity)
        })
    }

    fn select(&mut self, identity: Identity) {
        info!(source = %identity.product_name, id = identity.id, "Source selected");
        self.source.set_identity(identity.clone());
        self.source.emit(TwainEvent::DeviceSelected { identity });
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    /// Open the selected source. The source stays busy until it closes.
    #[instrument(skip(self))]
    pub fn open_source(&mut self) -> Result<&mut Source> {
        self.source.check_state(TwainState::SourceManagerOpen)?;
        self.source.open()?;
        self.source.set_busy(true);
        if !self.source.is_device_online() {
            let name = self.source.product_name().to_string();
            self.source.close()?;
            return Err(TwainError::DeviceOffline(name));
        }
        Ok(&mut self.source)
    }

    /// Open, negotiate and enable the selected source. The source is closed
    /// again if it did not end up enabled.
    #[instrument(skip(self))]
    pub fn acquire(&mut self) -> Result<()> {
        let source = self.open_source()?;
        let enabled = source.enable();
        let closed = source.close();
        enabled.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsm::MockDsm;
    use crate::events::{SessionSnapshot, TwainObserver};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Selected(Mutex<Vec<String>>);

    impl TwainObserver for Selected {
        fn on_event(&self, event: &TwainEvent, _snapshot: &SessionSnapshot) {
            if let TwainEvent::DeviceSelected { identity } = event {
                self.0.lock().unwrap().push(identity.product_name.clone());
            }
        }
    }

    fn manager(mock: &Arc<MockDsm>) -> (SourceManager, Arc<Selected>) {
        let observers = Arc::new(ObserverRegistry::new());
        let selected = Arc::new(Selected::default());
        observers.subscribe(selected.clone());
        let mut manager = SourceManager::new(
            mock.clone(),
            Identity::default(),
            observers,
            Arc::new(SharedSession::new()),
        );
        manager.open(0).unwrap();
        (manager, selected)
    }

    #[test]
    fn test_open_picks_default_source() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed", "Camera"]));
        mock.set_default_device("Camera");
        let (manager, _) = manager(&mock);
        assert_eq!(manager.state(), TwainState::SourceManagerOpen);
        assert_eq!(manager.source().product_name(), "Camera");
        assert_eq!(manager.app_identity().id, 1);
        assert!(mock.is_dsm_open());
    }

    #[test]
    fn test_open_without_sources_still_opens() {
        let mock = Arc::new(MockDsm::new());
        let (manager, _) = manager(&mock);
        assert_eq!(manager.state(), TwainState::SourceManagerOpen);
        assert_eq!(manager.source().product_name(), "");
    }

    #[test]
    fn test_identities() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed", "Camera", "Feeder"]));
        let (mut manager, _) = manager(&mock);
        assert_eq!(
            manager.device_names().unwrap(),
            vec!["Flatbed", "Camera", "Feeder"]
        );
        assert!(!manager.source().is_busy());
    }

    #[test]
    fn test_no_sources_is_empty_list() {
        let mock = Arc::new(MockDsm::new());
        let (mut manager, _) = manager(&mock);
        assert!(manager.identities().unwrap().is_empty());
    }

    #[test]
    fn test_enumeration_failure_clears_busy() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (mut manager, _) = manager(&mock);
        mock.script_failure(DAT_IDENTITY, MSG_GETNEXT, TWCC_LOWMEMORY);
        let err = manager.identities().unwrap_err();
        assert_eq!(err.condition(), Some(TWCC_LOWMEMORY));
        assert!(!manager.source().is_busy());
    }

    #[test]
    fn test_select_by_name() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed", "Camera"]));
        let (mut manager, selected) = manager(&mock);
        let identity = manager.select_by_name("Camera").unwrap();
        assert_eq!(identity.id, 101);
        assert_eq!(manager.source().id(), 101);
        assert_eq!(*selected.0.lock().unwrap(), vec!["Camera"]);

        assert!(matches!(
            manager.select_by_name("Missing"),
            Err(TwainError::SourceNotFound(name)) if name == "Missing"
        ));
        assert_eq!(manager.source().id(), 101);
    }

    #[test]
    fn test_user_select_and_cancel() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed", "Camera"]));
        let (mut manager, selected) = manager(&mock);
        mock.set_user_selection(Some("Camera"));
        assert_eq!(
            manager.select_source().unwrap().unwrap().product_name,
            "Camera"
        );

        mock.set_user_selection(None);
        assert!(manager.select_source().unwrap().is_none());
        assert_eq!(manager.source().product_name(), "Camera");
        assert_eq!(selected.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_select_requires_manager_open() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (mut manager, _) = manager(&mock);
        manager.open_source().unwrap();
        mock.clear_calls();
        assert!(matches!(
            manager.select_by_name("Flatbed"),
            Err(TwainError::WrongState { .. })
        ));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_offline_source_is_closed() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        mock.set_online(false);
        let (mut manager, _) = manager(&mock);
        assert!(matches!(
            manager.open_source(),
            Err(TwainError::DeviceOffline(name)) if name == "Flatbed"
        ));
        assert_eq!(manager.state(), TwainState::SourceManagerOpen);
        assert!(!manager.source().is_busy());
        assert_eq!(mock.open_source_id(), None);
    }

    #[test]
    fn test_acquire_with_ui_leaves_source_enabled() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (mut manager, _) = manager(&mock);
        manager.acquire().unwrap();
        assert_eq!(manager.state(), TwainState::SourceEnabled);
        assert!(manager.source().is_busy());

        // The scanner preset announces one image.
        assert!(manager.source_mut().handle_event(0).unwrap());
        assert_eq!(manager.state(), TwainState::SourceEnabled);
    }

    #[test]
    fn test_acquire_enable_failure_closes_source() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (mut manager, _) = manager(&mock);
        mock.script_failure(DAT_USERINTERFACE, MSG_ENABLEDS, TWCC_OPERATIONERROR);
        assert!(manager.acquire().is_err());
        assert_eq!(manager.state(), TwainState::SourceManagerOpen);
    }

    #[test]
    fn test_close_tears_down_open_source() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let (mut manager, _) = manager(&mock);
        manager.acquire().unwrap();
        manager.close().unwrap();
        assert_eq!(manager.state(), TwainState::SourceManagerLoaded);
        assert!(!mock.is_dsm_open());
        assert_eq!(mock.count_calls(DAT_USERINTERFACE, MSG_DISABLEDS), 1);
        assert_eq!(mock.count_calls(DAT_IDENTITY, MSG_CLOSEDS), 1);
    }
}
