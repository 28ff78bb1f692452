//! Session lifecycle state machine
//!
//! State transitions (client on the left, server mirror on the right):
//!
//! ```text
//! init  --create_req-->        creating        init --create_req_and_resp--> created
//! creating --create_resp(OK)-> created         created --activate_req_and_resp--> userActivated
//! created  --user_activate-->  userActivating
//! userActivating --activate_resp(OK)--> userActivated
//! userActivated  --lost_channel--> scOrphaned
//! scOrphaned     --sc_activate_req--> scActivating
//! scActivating   --activate_resp(OK)--> userActivated
//! any-non-closed --close_req-->  closing
//! closing --close_resp|timeout|fail--> closed
//! any state --fatal/mismatch--> closed
//! ```
//!
//! Invariants:
//! - `closed` is terminal; no transition ever leaves it
//! - server-side reactivation may change the channel or the user, never
//!   both in one request
//! - a session in `scOrphaned` keeps its token and user; only the bound
//!   channel is stale

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Fresh record; no channel, no token
    Init,
    /// Client sent CreateSession, awaiting the response
    Creating,
    /// Token present, channel valid, no user yet
    Created,
    /// Client sent ActivateSession with a user identity
    UserActivating,
    /// Client reactivating on a fresh channel after orphaning
    ScActivating,
    /// Token, channel and user all present; channel connected
    UserActivated,
    /// Bound channel is stale; reactivation on a fresh channel allowed
    ScOrphaned,
    /// Close requested, awaiting the response
    Closing,
    /// Terminal until the record is deleted
    Closed,
}

impl SessionState {
    /// Is the session fully usable for session-scoped services?
    pub fn is_activated(self) -> bool {
        matches!(self, SessionState::UserActivated)
    }

    /// Is this the terminal state?
    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Is an activate response expected?
    pub fn is_activating(self) -> bool {
        matches!(
            self,
            SessionState::UserActivating | SessionState::ScActivating
        )
    }

    /// Is a response of any kind outstanding for the lifecycle itself?
    pub fn awaits_lifecycle_response(self) -> bool {
        matches!(
            self,
            SessionState::Creating
                | SessionState::UserActivating
                | SessionState::ScActivating
                | SessionState::Closing
        )
    }

    /// Can the state machine move from `self` to `target`?
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        match (self, target) {
            // closed is terminal
            (Closed, _) => false,
            // fatal errors and mismatches close from anywhere else
            (_, Closed) => true,
            // a close request is legal from any non-closed state
            (Closing, Closing) => false,
            (_, Closing) => true,

            (Init, Creating) => true,
            // server mint: create request and response in one step
            (Init, Created) => true,
            (Creating, Created) => true,
            (Created, UserActivating) => true,
            // server mirror: activate request and response in one step
            (Created, UserActivated) => true,
            (UserActivating, UserActivated) => true,
            // client re-activation with a different user
            (UserActivated, UserActivating) => true,
            // server-side reactivation (channel transfer or user change)
            (UserActivated, UserActivated) => true,
            (UserActivated, ScActivating) => true,
            (UserActivated, ScOrphaned) => true,
            (ScOrphaned, ScActivating) => true,
            // server-side channel transfer straight back to activated
            (ScOrphaned, UserActivated) => true,
            (ScActivating, UserActivated) => true,
            _ => false,
        }
    }
}
