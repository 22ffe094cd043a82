//! Capability negotiation on an open source.
//!
//! Each request sends a 12-byte `TW_CAPABILITY` record. For reads the source
//! allocates the container; we adopt, decode and free it. For writes we
//! allocate the container and free it once the call returns.

use std::fmt;

use tracing::{debug, instrument, warn};

use crate::codec::{Container, Item};
use crate::dsm::MemoryBlock;
use crate::error::{Result, TwainError};
use crate::protocol::*;
use crate::source::Source;
use crate::state::TwainState;

/// Capabilities with typed convenience accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Generic,
    Compression,
    XferMech,
    ImageFileFormat,
}

impl CapabilityKind {
    pub fn of(id: u16) -> Self {
        match id {
            ICAP_COMPRESSION => CapabilityKind::Compression,
            ICAP_XFERMECH => CapabilityKind::XferMech,
            ICAP_IMAGEFILEFORMAT => CapabilityKind::ImageFileFormat,
            _ => CapabilityKind::Generic,
        }
    }
}

/// Accessor for one capability of a source. Holds the container returned
/// by the latest request.
pub struct Capability<'a> {
    source: &'a Source,
    id: u16,
    kind: CapabilityKind,
    latest: Option<Container>,
}

impl<'a> Capability<'a> {
    pub fn new(source: &'a Source, id: u16) -> Self {
        Self {
            source,
            id,
            kind: CapabilityKind::of(id),
            latest: None,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Symbolic name, or the hex id for custom capabilities.
    pub fn name(&self) -> String {
        match capability_name(self.id) {
            Some(name) => name.to_string(),
            None => format!("0x{:04X}", self.id),
        }
    }

    pub fn latest(&self) -> Option<&Container> {
        self.latest.as_ref()
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    pub fn get(&mut self) -> Result<Container> {
        self.request(MSG_GET, TWON_DONTCARE)
    }

    pub fn get_current(&mut self) -> Result<Container> {
        self.request(MSG_GETCURRENT, TWON_DONTCARE)
    }

    pub fn get_default(&mut self) -> Result<Container> {
        self.request(MSG_GETDEFAULT, TWON_DONTCARE)
    }

    pub fn reset(&mut self) -> Result<Container> {
        self.request(MSG_RESET, TWON_DONTCARE)
    }

    /// Whether every `TWQC_*` bit in `flags` is supported. Never fails.
    pub fn query_support(&mut self, flags: u32) -> bool {
        match self
            .request(MSG_QUERYSUPPORT, TWON_ONEVALUE)
            .and_then(|c| c.int_value())
        {
            Ok(supported) => (supported as u32) & flags == flags,
            Err(e) => {
                debug!(capability = %self.name(), error = %e, "Query support failed");
                false
            }
        }
    }

    fn request(&mut self, msg: u16, con_type: u16) -> Result<Container> {
        self.source.check_state_at_least(TwainState::SourceOpen)?;
        let mut data = CapabilityRecord::new(self.id, con_type, 0).to_bytes();
        self.source
            .call(DG_CONTROL, DAT_CAPABILITY, msg, &mut data)?;
        let record = CapabilityRecord::from_bytes(&data)?;

        let block = MemoryBlock::adopt(self.source.dsm(), record.container).ok_or_else(|| {
            TwainError::MalformedContainer(format!("{} returned no container", self.name()))
        })?;
        let bytes = block.read_all()?;
        drop(block);

        let container = Container::decode(record.con_type, &bytes, self.source.layout())?;
        self.latest = Some(container.clone());
        Ok(container)
    }

    /// Send `container` with `MSG_SET`.
    #[instrument(skip(self, container), fields(capability = %self.name()))]
    pub fn set(&mut self, container: &Container) -> Result<()> {
        self.source.check_state(TwainState::SourceOpen)?;
        let bytes = container.to_bytes()?;
        let block = MemoryBlock::alloc(self.source.dsm(), bytes.len())?;
        block.write_all(&bytes)?;

        let mut data =
            CapabilityRecord::new(self.id, container.con_type(), block.handle()).to_bytes();
        match self.source.call(DG_CONTROL, DAT_CAPABILITY, MSG_SET, &mut data) {
            Ok(_) => {
                self.latest = Some(container.clone());
                Ok(())
            }
            Err(TwainError::CheckStatus) => {
                debug!("Source adjusted the value, re-reading");
                if let Err(e) = self.get() {
                    warn!(error = %e, "Re-read after check status failed");
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read, change and verify the current value. Does nothing when the
    /// source already reports `value`.
    pub fn set_current_value(&mut self, value: impl Into<Item>) -> Result<()> {
        let value = value.into();
        let current = self.get_current()?;
        let wanted = value.clone().coerce(current.item_type())?;
        if current.current_value()? == wanted {
            return Ok(());
        }

        let mut container = self.get()?;
        container.set_current_value(value)?;
        self.set(&container)?;

        let actual = self.get()?.current_value()?;
        if actual != wanted {
            return Err(TwainError::CapabilityNotSettable {
                capability: self.id,
                value: wanted.to_string(),
            });
        }
        Ok(())
    }

    pub fn bool_value(&mut self) -> Result<bool> {
        self.get_current()?.bool_value()
    }

    pub fn int_value(&mut self) -> Result<i64> {
        self.get_current()?.int_value()
    }

    pub fn f64_value(&mut self) -> Result<f64> {
        self.get_current()?.f64_value()
    }

    /// Values the source accepts.
    pub fn supported_values(&mut self) -> Result<Vec<Item>> {
        Ok(self.get()?.items())
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    /// `ICAP_XFERMECH`, native when it cannot be read.
    pub fn transfer_mechanism(&mut self) -> u16 {
        self.u16_or(TWSX_NATIVE)
    }

    /// `ICAP_IMAGEFILEFORMAT`, BMP when it cannot be read.
    pub fn file_format(&mut self) -> u16 {
        self.u16_or(TWFF_BMP)
    }

    /// `ICAP_COMPRESSION`, none when it cannot be read.
    pub fn compression(&mut self) -> u16 {
        self.u16_or(TWCP_NONE)
    }

    fn u16_or(&mut self, fallback: u16) -> u16 {
        match self.int_value().map(u16::try_from) {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => fallback,
            Err(e) => {
                debug!(capability = %self.name(), error = %e, fallback, "Using fallback");
                fallback
            }
        }
    }
}

impl fmt::Display for Capability<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.latest {
            Some(container) => match container.current_value() {
                Ok(value) => write!(f, "{} = {}", self.name(), value),
                Err(_) => write!(f, "{} ({} values)", self.name(), container.items().len()),
            },
            None => write!(f, "{}", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ItemType, OneValue};
    use crate::dsm::{Link, MockDsm};
    use crate::events::ObserverRegistry;
    use crate::source::SharedSession;
    use std::sync::Arc;

    fn open_source(mock: &Arc<MockDsm>) -> Source {
        let link = Arc::new(Link::new(mock.clone(), Identity::default()));
        let mut source = Source::new(
            link,
            Arc::new(ObserverRegistry::new()),
            Arc::new(SharedSession::new()),
        );
        source.set_state(TwainState::SourceManagerOpen);
        source.set_identity(Identity {
            product_name: "Flatbed".into(),
            ..Default::default()
        });
        source.open().unwrap();
        source
    }

    #[test]
    fn test_get_frees_source_container() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let source = open_source(&mock);
        let mut cap = source.capability(ICAP_PIXELTYPE);
        let container = cap.get().unwrap();
        assert_eq!(container.con_type(), TWON_ENUMERATION);
        assert_eq!(container.current_value().unwrap(), Item::UInt16(TWPT_RGB));
        assert_eq!(cap.get_current().unwrap().con_type(), TWON_ONEVALUE);
        assert_eq!(mock.live_blocks(), 0);
        assert!(cap.latest().is_some());
    }

    #[test]
    fn test_kind_and_name() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let source = open_source(&mock);
        assert_eq!(source.capability(ICAP_XFERMECH).kind(), CapabilityKind::XferMech);
        assert_eq!(source.capability(ICAP_XFERMECH).name(), "ICAP_XFERMECH");
        assert_eq!(source.capability(0x8123).name(), "0x8123");
        assert_eq!(source.capability(0x8123).kind(), CapabilityKind::Generic);
    }

    #[test]
    fn test_query_support_never_fails() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        mock.set_unsupported(ICAP_GAMMA);
        mock.set_read_only(CAP_UICONTROLLABLE);
        let source = open_source(&mock);

        assert!(source.capability(ICAP_PIXELTYPE).query_support(TWQC_GET | TWQC_SET));
        assert!(!source.capability(ICAP_GAMMA).query_support(TWQC_GET));
        assert!(!source.capability(CAP_UICONTROLLABLE).query_support(TWQC_SET));
        assert!(source.capability(CAP_UICONTROLLABLE).query_support(TWQC_GET));
    }

    #[test]
    fn test_set_releases_buffer_on_failure() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let source = open_source(&mock);
        mock.script_failure(DAT_CAPABILITY, MSG_SET, TWCC_BADVALUE);
        let container = Container::OneValue(OneValue::new(ItemType::Bool, false).unwrap());
        let err = source.capability(CAP_INDICATORS).set(&container).unwrap_err();
        assert_eq!(err.condition(), Some(TWCC_BADVALUE));
        assert_eq!(mock.live_blocks(), 0);
    }

    #[test]
    fn test_set_check_status_rereads() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let source = open_source(&mock);
        mock.script(DAT_CAPABILITY, MSG_SET, TWRC_CHECKSTATUS);
        let container = Container::OneValue(OneValue::new(ItemType::Bool, false).unwrap());
        let mut cap = source.capability(CAP_INDICATORS);
        cap.set(&container).unwrap();
        assert_eq!(mock.count_calls(DAT_CAPABILITY, MSG_GET), 1);
        assert!(cap.latest().unwrap().bool_value().unwrap());
    }

    #[test]
    fn test_read_only_capability_is_not_settable() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        mock.set_read_only(CAP_INDICATORS);
        let source = open_source(&mock);
        let err = source
            .capability(CAP_INDICATORS)
            .set_current_value(false)
            .unwrap_err();
        assert!(matches!(
            err,
            TwainError::CapabilityNotSettable {
                capability: CAP_INDICATORS,
                ..
            }
        ));
    }

    #[test]
    fn test_set_current_value_skips_equal_value() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let source = open_source(&mock);
        mock.clear_calls();
        source.capability(CAP_INDICATORS).set_current_value(true).unwrap();
        assert_eq!(mock.count_calls(DAT_CAPABILITY, MSG_SET), 0);
        assert_eq!(mock.count_calls(DAT_CAPABILITY, MSG_GETCURRENT), 1);
    }

    #[test]
    fn test_enumeration_rejects_unknown_value() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        let source = open_source(&mock);
        let err = source
            .capability(ICAP_COMPRESSION)
            .set_current_value(Item::UInt16(TWCP_LZW))
            .unwrap_err();
        assert!(matches!(err, TwainError::ValueNotFound(_)));
    }

    #[test]
    fn test_typed_fallbacks() {
        let mock = Arc::new(MockDsm::new());
        mock.add_device("Bare");
        let source = open_source_named(&mock, "Bare");
        assert_eq!(source.capability(ICAP_XFERMECH).transfer_mechanism(), TWSX_NATIVE);
        assert_eq!(source.capability(ICAP_IMAGEFILEFORMAT).file_format(), TWFF_BMP);
        assert_eq!(source.capability(ICAP_COMPRESSION).compression(), TWCP_NONE);
    }

    fn open_source_named(mock: &Arc<MockDsm>, name: &str) -> Source {
        let link = Arc::new(Link::new(mock.clone(), Identity::default()));
        let mut source = Source::new(
            link,
            Arc::new(ObserverRegistry::new()),
            Arc::new(SharedSession::new()),
        );
        source.set_state(TwainState::SourceManagerOpen);
        source.set_identity(Identity {
            product_name: name.into(),
            ..Default::default()
        });
        source.open().unwrap();
        source
    }

    #[test]
    fn test_unsupported_capability_reports_condition() {
        let mock = Arc::new(MockDsm::scanner(&["Flatbed"]));
        mock.set_unsupported(ICAP_GAMMA);
        let source = open_source(&mock);
        let err = source.capability(ICAP_GAMMA).get().unwrap_err();
        assert_eq!(err.condition(), Some(TWCC_CAPUNSUPPORTED));
    }
}
