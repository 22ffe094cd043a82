//! TWAIN session states.

use std::fmt;

/// Session state of the application/source pair.
///
/// Ordered: later states imply every earlier one has been passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum TwainState {
    #[default]
    Uninitialized = 0,
    PreSession = 1,
    SourceManagerLoaded = 2,
    SourceManagerOpen = 3,
    SourceOpen = 4,
    SourceEnabled = 5,
    TransferReady = 6,
    Transferring = 7,
}

impl TwainState {
    pub const ALL: [TwainState; 8] = [
        TwainState::Uninitialized,
        TwainState::PreSession,
        TwainState::SourceManagerLoaded,
        TwainState::SourceManagerOpen,
        TwainState::SourceOpen,
        TwainState::SourceEnabled,
        TwainState::TransferReady,
        TwainState::Transferring,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human readable name, empty for `Uninitialized`.
    pub fn name(self) -> &'static str {
        match self {
            TwainState::Uninitialized => "",
            TwainState::PreSession => "Pre-Session",
            TwainState::SourceManagerLoaded => "Source Manager Loaded",
            TwainState::SourceManagerOpen => "Source Manager Open",
            TwainState::SourceOpen => "Source Open",
            TwainState::SourceEnabled => "Source Enabled",
            TwainState::TransferReady => "Transfer Ready",
            TwainState::Transferring => "Transferring Data",
        }
    }
}

impl fmt::Display for TwainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(TwainState::SourceOpen < TwainState::SourceEnabled);
        assert!(TwainState::Transferring > TwainState::TransferReady);
        assert_eq!(TwainState::from_u8(5), Some(TwainState::SourceEnabled));
        assert_eq!(TwainState::from_u8(8), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TwainState::SourceManagerOpen.to_string(),
            "Source Manager Open (3)"
        );
    }
}
