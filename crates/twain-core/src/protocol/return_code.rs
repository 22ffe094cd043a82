//! Return codes reported by `DSM_Entry`.

use std::fmt;

use super::constants::*;
use crate::error::{Result, TwainError};

/// Raw `TWRC_*` value with a readable name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReturnCode(pub u16);

impl ReturnCode {
    pub fn name(&self) -> Option<&'static str> {
        Some(match self.0 {
            TWRC_SUCCESS => "TWRC_SUCCESS",
            TWRC_FAILURE => "TWRC_FAILURE",
            TWRC_CHECKSTATUS => "TWRC_CHECKSTATUS",
            TWRC_CANCEL => "TWRC_CANCEL",
            TWRC_DSEVENT => "TWRC_DSEVENT",
            TWRC_NOTDSEVENT => "TWRC_NOTDSEVENT",
            TWRC_XFERDONE => "TWRC_XFERDONE",
            TWRC_ENDOFLIST => "TWRC_ENDOFLIST",
            TWRC_INFONOTSUPPORTED => "TWRC_INFONOTSUPPORTED",
            TWRC_DATANOTAVAILABLE => "TWRC_DATANOTAVAILABLE",
            _ => return None,
        })
    }

    /// Classify a non-`FAILURE` code.
    ///
    /// `FAILURE` needs the condition code, so the caller resolves it and
    /// this returns `None`.
    pub fn classify(self) -> Option<Result<Completion>> {
        Some(match self.0 {
            TWRC_SUCCESS => Ok(Completion::Success),
            TWRC_DSEVENT => Ok(Completion::DsEvent),
            TWRC_XFERDONE => Ok(Completion::TransferDone),
            TWRC_ENDOFLIST => Ok(Completion::EndOfList),
            TWRC_FAILURE => return None,
            TWRC_CHECKSTATUS => Err(TwainError::CheckStatus),
            TWRC_CANCEL => Err(TwainError::Cancel),
            TWRC_NOTDSEVENT => Err(TwainError::NotDsEvent),
            TWRC_INFONOTSUPPORTED => Err(TwainError::InfoNotSupported),
            TWRC_DATANOTAVAILABLE => Err(TwainError::DataNotAvailable),
            code => Err(TwainError::Protocol {
                code,
                condition: None,
                message: format!("Failed to call data source. RC = {}", code),
            }),
        })
    }
}

impl fmt::Debug for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "TWRC({})", self.0),
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Non-error outcome of a protocol call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    DsEvent,
    /// The current image transfer finished.
    TransferDone,
    /// An enumeration ran past its last element.
    EndOfList,
}

impl Completion {
    /// Collapse control-flow completions into errors for callers that
    /// expected a plain success.
    pub fn into_result(self) -> Result<()> {
        match self {
            Completion::Success | Completion::DsEvent => Ok(()),
            Completion::TransferDone => Err(TwainError::TransferDone),
            Completion::EndOfList => Err(TwainError::EndOfList),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_control_flow_codes() {
        assert_eq!(
            ReturnCode(TWRC_XFERDONE).classify().unwrap().unwrap(),
            Completion::TransferDone
        );
        assert_eq!(
            ReturnCode(TWRC_ENDOFLIST).classify().unwrap().unwrap(),
            Completion::EndOfList
        );
        assert!(ReturnCode(TWRC_FAILURE).classify().is_none());
    }

    #[test]
    fn test_classify_conditions() {
        assert!(matches!(
            ReturnCode(TWRC_CHECKSTATUS).classify(),
            Some(Err(TwainError::CheckStatus))
        ));
        assert!(matches!(
            ReturnCode(TWRC_NOTDSEVENT).classify(),
            Some(Err(TwainError::NotDsEvent))
        ));
        assert!(matches!(
            ReturnCode(42).classify(),
            Some(Err(TwainError::Protocol { code: 42, .. }))
        ));
    }

    #[test]
    fn test_into_result() {
        assert!(Completion::DsEvent.into_result().is_ok());
        assert!(matches!(
            Completion::EndOfList.into_result(),
            Err(TwainError::EndOfList)
        ));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", ReturnCode(TWRC_CANCEL)), "TWRC_CANCEL");
        assert_eq!(format!("{:?}", ReturnCode(77)), "TWRC(77)");
    }
}
