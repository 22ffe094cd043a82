//! Per-device state machine.
//!
//! A [`Source`] owns the identity of the selected data source and the
//! session state. Every state-sensitive operation checks the current state
//! first and fails with [`TwainError::WrongState`] without touching the DSM.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};

use crate::capability::Capability;
use crate::codec::{Frame, Item, Layout};
use crate::dsm::{Dsm, Link};
use crate::error::{Result, TwainError};
use crate::events::{Negotiation, ObserverRegistry, SessionSnapshot, TwainEvent};
use crate::protocol::*;
use crate::state::TwainState;
use crate::transfer::{DefaultTransferFactory, Transfer, TransferFactory};

// ============================================================================
// Shared session status
// ============================================================================

/// Session status readable from any thread.
///
/// Only the owning thread writes the snapshot; the cancel flag may be set
/// by anyone.
#[derive(Default)]
pub struct SharedSession {
    snapshot: Mutex<SessionSnapshot>,
    cancel: AtomicBool,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.cancel = self.is_cancelled();
        snapshot
    }

    pub fn set_cancel(&self, cancel: bool) {
        self.cancel.store(cancel, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        f(&mut self.snapshot.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Unit for [`Source::set_region_of_interest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionUnit {
    Pixels,
    Centimeters,
}

impl RegionUnit {
    fn twain_unit(self) -> u16 {
        match self {
            RegionUnit::Pixels => TWUN_PIXELS,
            RegionUnit::Centimeters => TWUN_CENTIMETERS,
        }
    }
}

// ============================================================================
// Source
// ============================================================================

pub struct Source {
    link: Arc<Link>,
    identity: Identity,
    state: TwainState,
    busy: bool,
    show_ui: bool,
    modal_ui: bool,
    parent: u32,
    shared: Arc<SharedSession>,
    observers: Arc<ObserverRegistry>,
    factory: Box<dyn TransferFactory>,
    mechanism: u16,
    file_format: u16,
    preferred_mechanism: Option<u16>,
    preferred_file_format: Option<u16>,
    file_transfer_dir: PathBuf,
    layout: Layout,
}

impl Source {
    pub fn new(
        link: Arc<Link>,
        observers: Arc<ObserverRegistry>,
        shared: Arc<SharedSession>,
    ) -> Self {
        let source = Self {
            link,
            identity: Identity::default(),
            state: TwainState::SourceManagerLoaded,
            busy: false,
            show_ui: true,
            modal_ui: false,
            parent: 0,
            shared,
            observers,
            factory: Box::new(DefaultTransferFactory),
            mechanism: TWSX_NATIVE,
            file_format: TWFF_BMP,
            preferred_mechanism: None,
            preferred_file_format: None,
            file_transfer_dir: std::env::temp_dir(),
            layout: Layout::default(),
        };
        source.shared.update(|s| {
            s.state = source.state;
            s.previous = source.state;
        });
        source
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn id(&self) -> u32 {
        self.identity.id
    }

    pub fn product_name(&self) -> &str {
        &self.identity.product_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.identity.manufacturer
    }

    pub fn product_family(&self) -> &str {
        &self.identity.product_family
    }

    pub(crate) fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
        let identity = self.identity.clone();
        self.shared.update(|s| s.source = Some(identity));
    }

    pub fn state(&self) -> TwainState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
        self.shared.update(|s| s.busy = busy);
    }

    pub fn show_ui(&self) -> bool {
        self.show_ui
    }

    pub fn set_show_ui(&mut self, show_ui: bool) {
        self.show_ui = show_ui;
    }

    /// Whether the source reported a modal UI on the last enable.
    pub fn is_modal_ui(&self) -> bool {
        self.modal_ui
    }

    /// Parent window for the source UI. The user interface record only
    /// carries 32 bits; wider handles are dropped.
    pub fn set_parent(&mut self, parent: u64) {
        self.parent = u32::try_from(parent).unwrap_or_else(|_| {
            warn!(parent, "Parent window handle does not fit 32 bits, ignoring it");
            0
        });
    }

    pub fn parent(&self) -> u32 {
        self.parent
    }

    pub fn file_transfer_dir(&self) -> &Path {
        &self.file_transfer_dir
    }

    pub fn set_file_transfer_dir(&mut self, dir: impl Into<PathBuf>) {
        self.file_transfer_dir = dir.into();
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    pub fn set_transfer_factory(&mut self, factory: Box<dyn TransferFactory>) {
        self.factory = factory;
    }

    /// Mechanism and file format negotiated on enable, before observers run.
    pub fn set_preferred_transfer(&mut self, mechanism: Option<u16>, file_format: Option<u16>) {
        self.preferred_mechanism = mechanism;
        self.preferred_file_format = file_format;
    }

    /// Mechanism read back on the last enable.
    pub fn negotiated_mechanism(&self) -> u16 {
        self.mechanism
    }

    pub fn shared(&self) -> &Arc<SharedSession> {
        &self.shared
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    pub fn set_cancel(&self, cancel: bool) {
        self.shared.set_cancel(cancel);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn dsm(&self) -> &Arc<dyn Dsm> {
        self.link.dsm()
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    pub fn emit(&self, event: TwainEvent) {
        let snapshot = self.snapshot();
        self.observers.emit(&event, &snapshot);
    }

    pub(crate) fn set_state(&mut self, to: TwainState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(from = %from, to = %to, "State transition");
        self.shared.update(|s| {
            s.previous = from;
            s.state = to;
        });
        self.emit(TwainEvent::StateChanged { from, to });
    }

    /// Fail unless the session is exactly in `expected`.
    pub fn check_state(&self, expected: TwainState) -> Result<()> {
        if self.state != expected {
            return Err(TwainError::WrongState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Fail unless the session is in `expected` or beyond.
    pub fn check_state_at_least(&self, expected: TwainState) -> Result<()> {
        if self.state < expected {
            return Err(TwainError::WrongState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Raise the user cancel condition while waiting to transfer.
    pub fn check_cancel(&self) -> Result<()> {
        if self.state == TwainState::TransferReady && self.is_cancelled() {
            return Err(TwainError::UserCancel);
        }
        Ok(())
    }

    /// Call the data source.
    pub fn call(&self, dg: u32, dat: u16, msg: u16, data: &mut [u8]) -> Result<Completion> {
        self.link.call(Some(&self.identity), dg, dat, msg, data)
    }

    // ------------------------------------------------------------------
    // Open / enable / disable / close
    // ------------------------------------------------------------------

    /// `MSG_OPENDS` on the current identity.
    #[instrument(skip(self), fields(source = %self.identity.product_name))]
    pub fn open(&mut self) -> Result<()> {
        self.check_state(TwainState::SourceManagerOpen)?;
        let mut data = self.identity.to_bytes();
        self.link
            .call(None, DG_CONTROL, DAT_IDENTITY, MSG_OPENDS, &mut data)?;
        let identity = Identity::from_bytes(&data)?;
        self.set_identity(identity);
        self.set_state(TwainState::SourceOpen);
        Ok(())
    }

    /// `MSG_CLOSEDS`. A no-op unless the source is open and disabled.
    #[instrument(skip(self), fields(source = %self.identity.product_name))]
    pub fn close(&mut self) -> Result<()> {
        if self.state != TwainState::SourceOpen {
            return Ok(());
        }
        let mut data = self.identity.to_bytes();
        self.link
            .call(None, DG_CONTROL, DAT_IDENTITY, MSG_CLOSEDS, &mut data)?;
        self.set_busy(false);
        self.set_state(TwainState::SourceManagerOpen);
        Ok(())
    }

    /// Negotiate, then `MSG_ENABLEDS`.
    #[instrument(skip(self), fields(source = %self.identity.product_name))]
    pub fn enable(&mut self) -> Result<()> {
        self.check_state(TwainState::SourceOpen)?;

        if let Some(mechanism) = self.preferred_mechanism {
            self.set_transfer_mechanism(mechanism);
        }
        if let Some(format) = self.preferred_file_format {
            if let Err(e) = self.set_image_file_format(format) {
                warn!(error = %e, "Cannot set preferred file format");
            }
        }
        self.emit(TwainEvent::NegotiateCapabilities);
        for observer in self.observers.observers() {
            if observer.negotiate(self) == Negotiation::Cancel {
                info!("Negotiation cancelled, closing source");
                self.close()?;
                break;
            }
        }
        if self.state < TwainState::SourceOpen {
            return Ok(());
        }

        self.mechanism = self.transfer_mechanism();
        if self.mechanism == TWSX_FILE {
            self.file_format = self.image_file_format();
        }
        debug!(
            mechanism = self.mechanism,
            format = self.file_format,
            "Transfer negotiated"
        );

        let ui = UserInterface {
            show_ui: i16::from(self.show_ui),
            modal_ui: false,
            parent: self.parent,
        };
        let mut data = ui.to_bytes();
        match self.call(DG_CONTROL, DAT_USERINTERFACE, MSG_ENABLEDS, &mut data) {
            Ok(_) => {
                self.modal_ui = UserInterface::from_bytes(&data)?.modal_ui;
                self.set_state(TwainState::SourceEnabled);
                Ok(())
            }
            Err(TwainError::CheckStatus) => {
                debug!("Enable returned check status");
                self.set_state(TwainState::SourceEnabled);
                Ok(())
            }
            Err(TwainError::Cancel) => {
                info!("Enable cancelled by source");
                self.disable()?;
                self.close()
            }
            Err(e) => Err(e),
        }
    }

    /// `MSG_DISABLEDS`. A no-op below `SourceEnabled`.
    #[instrument(skip(self), fields(source = %self.identity.product_name))]
    pub fn disable(&mut self) -> Result<()> {
        if self.state < TwainState::SourceEnabled {
            return Ok(());
        }
        let ui = UserInterface {
            show_ui: -1,
            modal_ui: false,
            parent: self.parent,
        };
        self.call(DG_CONTROL, DAT_USERINTERFACE, MSG_DISABLEDS, &mut ui.to_bytes())?;
        self.set_state(TwainState::SourceOpen);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event routing and transfers
    // ------------------------------------------------------------------

    /// Offer an OS message to the source. Returns whether it was a source
    /// event.
    pub fn handle_event(&mut self, message: u64) -> Result<bool> {
        if self.state < TwainState::SourceEnabled {
            return Ok(false);
        }
        let mut data = EventRecord {
            event: message,
            message: MSG_NULL,
        }
        .to_bytes();
        match self.call(DG_CONTROL, DAT_EVENT, MSG_PROCESSEVENT, &mut data) {
            Ok(_) => {}
            Err(TwainError::NotDsEvent) => return Ok(false),
            Err(e) => return Err(e),
        }
        let event = EventRecord::from_bytes(&data)?;
        match event.message {
            MSG_XFERREADY => self.transfer()?,
            MSG_CLOSEDSREQ | MSG_CLOSEDSOK => {
                info!("Source requested close");
                self.disable()?;
                self.close()?;
            }
            MSG_DEVICEEVENT | MSG_NULL => {}
            other => debug!(message = other, "Ignoring source message"),
        }
        Ok(true)
    }

    /// Pull every pending image with the negotiated mechanism.
    #[instrument(skip(self), fields(mechanism = self.mechanism))]
    pub fn transfer(&mut self) -> Result<()> {
        self.check_state_at_least(TwainState::SourceEnabled)?;
        let result = self.transfer_pending();
        if result.is_err() && self.state > TwainState::SourceEnabled {
            self.set_state(TwainState::SourceEnabled);
        }
        if !self.is_cancelled() && self.show_ui {
            return result;
        }

        self.set_cancel(false);
        let closed = self.disable().and_then(|()| self.close());
        match (result, closed) {
            (Err(e), Err(teardown)) => {
                warn!(error = %teardown, "Teardown after failed transfer failed");
                Err(e)
            }
            (result, closed) => result.and(closed),
        }
    }

    fn transfer_pending(&mut self) -> Result<()> {
        loop {
            self.set_state(TwainState::TransferReady);
            let mut transfer = self.factory.create(self.mechanism, self.file_format);
            let step = self.transfer_one(transfer.as_mut());
            transfer.cleanup(self);
            if step? == 0 {
                return Ok(());
            }
        }
    }

    /// One image. Returns the pending count; 0 ends the loop.
    fn transfer_one(&mut self, transfer: &mut dyn Transfer) -> Result<i16> {
        match transfer.initiate(self) {
            Ok(()) => {
                self.set_state(TwainState::Transferring);
                if let Err(e) = transfer.finish(self) {
                    self.report(&e);
                }
                let count = self.end_transfer()?;
                if count == 0 {
                    self.set_state(TwainState::SourceEnabled);
                } else {
                    self.set_state(TwainState::TransferReady);
                }
                Ok(count)
            }
            Err(TwainError::UserCancel) => {
                info!("Transfer cancelled by user");
                self.reset_transfers()?;
                self.set_state(TwainState::SourceEnabled);
                Ok(0)
            }
            Err(TwainError::Cancel) => {
                info!("Transfer cancelled by source");
                if let Err(e) = transfer.cancel(self) {
                    warn!(error = %e, "Transfer cancel failed");
                }
                if self.end_transfer()? > 0 {
                    self.reset_transfers()?;
                }
                self.set_state(TwainState::SourceEnabled);
                Ok(0)
            }
            Err(e) => {
                self.report(&e);
                if self.end_transfer()? > 0 {
                    self.reset_transfers()?;
                }
                self.set_state(TwainState::SourceEnabled);
                Ok(0)
            }
        }
    }

    /// `MSG_ENDXFER`, returning the updated pending count.
    fn end_transfer(&self) -> Result<i16> {
        let mut data = PendingXfers::default().to_bytes();
        self.call(DG_CONTROL, DAT_PENDINGXFERS, MSG_ENDXFER, &mut data)?;
        let count = PendingXfers::from_bytes(&data)?.count;
        debug!(count, "End of transfer");
        Ok(count)
    }

    fn reset_transfers(&self) -> Result<()> {
        let mut data = PendingXfers::default().to_bytes();
        self.call(DG_CONTROL, DAT_PENDINGXFERS, MSG_RESET, &mut data)?;
        Ok(())
    }

    /// Surface an error to the listeners.
    pub fn report(&self, error: &TwainError) {
        tracing::error!(error = %error, state = %self.state, "Exception");
        self.emit(TwainEvent::Exception {
            message: error.to_string(),
        });
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    pub fn capability(&self, id: u16) -> Capability<'_> {
        Capability::new(self, id)
    }

    /// One accessor per id in `CAP_SUPPORTEDCAPS`. Ids the source cannot
    /// report are left out.
    pub fn capabilities(&self) -> Result<Vec<Capability<'_>>> {
        let supported = self.capability(CAP_SUPPORTEDCAPS).get()?;
        let mut capabilities = Vec::new();
        for item in supported.items() {
            let Some(id) = item.as_i64().and_then(|v| u16::try_from(v).ok()) else {
                continue;
            };
            let mut capability = self.capability(id);
            match capability.get() {
                Ok(_) => capabilities.push(capability),
                Err(e) => warn!(capability = %capability.name(), error = %e, "Skipping capability"),
            }
        }
        Ok(capabilities)
    }

    pub fn set_capability_bool(&self, id: u16, value: bool) -> Result<()> {
        self.capability(id).set_current_value(value)
    }

    pub fn set_capability_int(&self, id: u16, value: i32) -> Result<()> {
        self.capability(id).set_current_value(value)
    }

    pub fn set_capability_f64(&self, id: u16, value: f64) -> Result<()> {
        self.capability(id).set_current_value(value)
    }

    pub fn set_show_progress_bar(&self, show: bool) -> Result<()> {
        self.set_capability_bool(CAP_INDICATORS, show)
    }

    /// Set both resolutions in dots per inch.
    pub fn set_resolution(&self, dpi: f64) -> Result<()> {
        self.set_capability_int(ICAP_UNITS, i32::from(TWUN_INCHES))?;
        self.set_capability_f64(ICAP_XRESOLUTION, dpi)?;
        self.set_capability_f64(ICAP_YRESOLUTION, dpi)
    }

    /// Scan only part of the page. All components `-1` resets the layout.
    pub fn set_region_of_interest(
        &self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        unit: RegionUnit,
    ) -> Result<()> {
        if [x, y, width, height].iter().all(|&v| v == -1.0) {
            self.reset_image_layout()?;
            return Ok(());
        }
        self.set_capability_int(ICAP_UNITS, i32::from(unit.twain_unit()))?;
        let mut layout = self.image_layout()?;
        layout.frame = Frame::from_f64(x, y, x + width, y + height);
        self.set_image_layout(&layout)
    }

    /// Request a transfer mechanism. Unknown values select native transfer.
    /// Failures are reported to the listeners.
    pub fn set_transfer_mechanism(&self, mechanism: u16) {
        let mechanism = match mechanism {
            TWSX_NATIVE | TWSX_FILE | TWSX_MEMORY => mechanism,
            _ => TWSX_NATIVE,
        };
        if let Err(e) = self.capability(ICAP_XFERMECH).set_current_value(Item::UInt16(mechanism)) {
            self.report(&e);
        }
    }

    /// Current transfer mechanism, native when it cannot be read.
    pub fn transfer_mechanism(&self) -> u16 {
        self.capability(ICAP_XFERMECH).transfer_mechanism()
    }

    /// Request a file format. Unknown values select BMP.
    pub fn set_image_file_format(&self, format: u16) -> Result<()> {
        let format = if (format as usize) < FILE_FORMAT_EXTENSIONS.len() {
            format
        } else {
            TWFF_BMP
        };
        self.capability(ICAP_IMAGEFILEFORMAT)
            .set_current_value(Item::UInt16(format))
    }

    /// Current file format, BMP when it cannot be read.
    pub fn image_file_format(&self) -> u16 {
        self.capability(ICAP_IMAGEFILEFORMAT).file_format()
    }

    pub fn is_ui_controllable(&self) -> bool {
        self.capability(CAP_UICONTROLLABLE)
            .get_current()
            .and_then(|c| c.bool_value())
            .unwrap_or(false)
    }

    /// Sources that cannot report their status count as online.
    pub fn is_device_online(&self) -> bool {
        self.capability(CAP_DEVICEONLINE)
            .get_current()
            .and_then(|c| c.bool_value())
            .unwrap_or_else(|e| {
                debug!(error = %e, "Device online check failed, assuming online");
                true
            })
    }

    // ------------------------------------------------------------------
    // Image layout
    // ------------------------------------------------------------------

    pub fn image_layout(&self) -> Result<ImageLayoutRecord> {
        self.layout_call(MSG_GET, ImageLayoutRecord::default())
    }

    pub fn default_image_layout(&self) -> Result<ImageLayoutRecord> {
        self.layout_call(MSG_GETDEFAULT, ImageLayoutRecord::default())
    }

    pub fn reset_image_layout(&self) -> Result<ImageLayoutRecord> {
        self.check_state(TwainState::SourceOpen)?;
        self.layout_call(MSG_RESET, ImageLayoutRecord::default())
    }

    pub fn set_image_layout(&self, layout: &ImageLayoutRecord) -> Result<()> {
        self.check_state(TwainState::SourceOpen)?;
        match self.layout_call(MSG_SET, *layout) {
            Ok(_) | Err(TwainError::CheckStatus) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn layout_call(&self, msg: u16, layout: ImageLayoutRecord) -> Result<ImageLayoutRecord> {
        self.check_state_at_least(TwainState::SourceOpen)?;
        let mut data = layout.to_bytes();
        self.call(DG_IMAGE, DAT_IMAGELAYOUT, msg, &mut data)?;
        ImageLayoutRecord::from_bytes(&data)
    }
}
