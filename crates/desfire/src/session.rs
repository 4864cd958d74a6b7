//! Session state for an authenticated card channel
//!
//! The engine owns a single [`SessionState`] record and is its sole writer;
//! callers observe it through shared references only. Session keys are
//! zeroized when they are replaced or dropped.

use zeroize::Zeroize;

use crate::types::Aid;

/// Session keys derived from a successful handshake
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionKeys {
    /// Session encryption key
    enc: [u8; 16],
    /// Session MAC key
    mac: [u8; 16],
}

impl SessionKeys {
    /// Create a new key pair
    pub(crate) const fn new(enc: [u8; 16], mac: [u8; 16]) -> Self {
        Self { enc, mac }
    }

    /// Get the session encryption key
    pub(crate) const fn enc(&self) -> &[u8; 16] {
        &self.enc
    }

    /// Get the session MAC key
    pub(crate) const fn mac(&self) -> &[u8; 16] {
        &self.mac
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// State of the current card session
#[derive(Debug, Default)]
pub struct SessionState {
    authenticated: bool,
    key_no: u8,
    keys: Option<SessionKeys>,
    transaction_id: Option<[u8; 4]>,
    command_counter: u16,
    current_app: Aid,
}

impl SessionState {
    /// Fresh state: card level selected, not authenticated
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an authentication completed in this session
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Key number the session authenticated with
    pub const fn key_no(&self) -> u8 {
        self.key_no
    }

    /// Session keys, present for AES and EV2 authentications
    pub(crate) const fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// EV2 transaction identifier, established by EV2First
    pub const fn transaction_id(&self) -> Option<[u8; 4]> {
        self.transaction_id
    }

    /// EV2 command counter
    pub const fn command_counter(&self) -> u16 {
        self.command_counter
    }

    /// Currently selected application
    pub const fn current_app(&self) -> Aid {
        self.current_app
    }

    /// Drop all authentication material, keeping the selected application
    ///
    /// Dropping the keys zeroizes them.
    pub(crate) fn clear_auth(&mut self) {
        self.authenticated = false;
        self.key_no = 0;
        self.keys = None;
        self.transaction_id = None;
        self.command_counter = 0;
    }

    /// Record a successful SelectApplication; any session is invalidated
    pub(crate) fn select(&mut self, aid: Aid) {
        self.clear_auth();
        self.current_app = aid;
    }

    /// Record a successful authentication
    ///
    /// The engine passes the transaction identifier explicitly; for an EV2
    /// non-first authentication that is the identifier captured before the
    /// handshake reset the session.
    pub(crate) fn authenticate(
        &mut self,
        key_no: u8,
        keys: Option<SessionKeys>,
        transaction_id: Option<[u8; 4]>,
    ) {
        self.authenticated = true;
        self.key_no = key_no;
        self.keys = keys;
        self.transaction_id = transaction_id;
        self.command_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let state = SessionState::new();
        assert!(!state.is_authenticated());
        assert_eq!(state.current_app(), Aid::PICC);
        assert!(state.keys().is_none());
        assert!(state.transaction_id().is_none());
    }

    #[test]
    fn test_select_clears_session() {
        let mut state = SessionState::new();
        state.authenticate(
            1,
            Some(SessionKeys::new([0x11; 16], [0x22; 16])),
            Some([1, 2, 3, 4]),
        );
        assert!(state.is_authenticated());
        assert_eq!(state.transaction_id(), Some([1, 2, 3, 4]));

        let aid = Aid::new(0x0000AA).unwrap();
        state.select(aid);
        assert!(!state.is_authenticated());
        assert!(state.keys().is_none());
        assert!(state.transaction_id().is_none());
        assert_eq!(state.command_counter(), 0);
        assert_eq!(state.current_app(), aid);
    }

    #[test]
    fn test_reauthentication_replaces_state() {
        let mut state = SessionState::new();
        state.authenticate(
            0,
            Some(SessionKeys::new([0x11; 16], [0x22; 16])),
            Some([9, 9, 9, 9]),
        );

        state.authenticate(
            2,
            Some(SessionKeys::new([0x33; 16], [0x44; 16])),
            Some([9, 9, 9, 9]),
        );
        assert_eq!(state.transaction_id(), Some([9, 9, 9, 9]));
        assert_eq!(state.key_no(), 2);
        assert_eq!(state.command_counter(), 0);
    }

    #[test]
    fn test_legacy_auth_has_no_keys() {
        let mut state = SessionState::new();
        state.authenticate(0, None, None);
        assert!(state.is_authenticated());
        assert!(state.keys().is_none());
        assert!(state.transaction_id().is_none());
    }
}
