//! Caller-tunable session parameters. Protocol invariants such as
//! [`crate::session::state::MAX_FORWARD_JUMPS`] or
//! [`crate::session::state::MAX_MESSAGE_KEYS`] are fixed by the wire
//! protocol and stay as module constants; this struct is for the
//! smaller set of knobs that are genuinely a caller policy choice.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// How long a pending (unacknowledged) prekey message may keep being
    /// re-wrapped into outgoing `PreKeySignalMessage`s before `encrypt`
    /// refuses to reuse it and returns `SessionNotFound`, forcing the
    /// caller to re-fetch a prekey bundle and reinitialize.
    pub max_unacknowledged_session_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_unacknowledged_session_age_secs: 30 * 24 * 60 * 60,
        }
    }
}
