//! Session records, registry and the lifecycle state machine operations
//!
//! One registry holds every session the stack knows about, client and
//! server side alike. The operations mirror the protocol: client
//! operations come in request/response pairs with the response arriving
//! as a later event, server operations handle request and response in
//! one step. Any guard violation closes the session — a mismatch is
//! never ignored.

pub mod request_handle;
pub mod state;

pub use request_handle::RequestHandleTable;
pub use state::SessionState;

use crate::channel::{ChannelConfigIdx, ChannelSurface};
use crate::error::StatusCode;
use crate::message::Message;
use crate::types::{ChannelHandle, Nonce, RequestHandle, SessionId, SessionToken, UserIdentity};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Length of the session nonces in bytes
const NONCE_LENGTH: usize = 32;

fn fresh_nonce() -> Nonce {
    let mut nonce = vec![0u8; NONCE_LENGTH];
    rand::rngs::OsRng.fill(&mut nonce[..]);
    nonce
}

/// Per-session record
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    channel: Option<ChannelHandle>,
    token: Option<SessionToken>,
    user: Option<UserIdentity>,
    pending_requests: HashSet<RequestHandle>,
    client_nonce: Option<Nonce>,
    server_nonce: Option<Nonce>,
    orphaned_from: Option<ChannelHandle>,
    orphaned_config: Option<ChannelConfigIdx>,
    replacement_channel: Option<ChannelHandle>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Init,
            channel: None,
            token: None,
            user: None,
            pending_requests: HashSet::new(),
            client_nonce: None,
            server_nonce: None,
            orphaned_from: None,
            orphaned_config: None,
            replacement_channel: None,
        }
    }

    /// Registry identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bound channel, indeterminate in `Init` and stale in `ScOrphaned`
    pub fn channel(&self) -> Option<ChannelHandle> {
        self.channel
    }

    /// Session token, present from `Created` onwards
    pub fn token(&self) -> Option<SessionToken> {
        self.token
    }

    /// User identity, present once activation succeeded at least once
    pub fn user(&self) -> Option<&UserIdentity> {
        self.user.as_ref()
    }

    /// Outstanding request handles issued by this session
    pub fn pending_requests(&self) -> impl Iterator<Item = RequestHandle> + '_ {
        self.pending_requests.iter().copied()
    }

    /// Client nonce of the creation exchange
    pub fn client_nonce(&self) -> Option<&Nonce> {
        self.client_nonce.as_ref()
    }

    /// Server nonce of the creation exchange
    pub fn server_nonce(&self) -> Option<&Nonce> {
        self.server_nonce.as_ref()
    }

    /// Channel the session was bound to before orphaning
    pub fn orphaned_from(&self) -> Option<ChannelHandle> {
        self.orphaned_from
    }

    /// Replacement channel remembered at orphaning time
    pub fn replacement_channel(&self) -> Option<ChannelHandle> {
        self.replacement_channel
    }

    fn set_state(&mut self, target: SessionState) -> bool {
        if self.state.can_transition_to(target) {
            debug!(session = %self.id, from = ?self.state, to = ?target, "session transition");
            self.state = target;
            true
        } else {
            warn!(
                session = %self.id,
                from = ?self.state,
                to = ?target,
                "forbidden session transition, closing"
            );
            self.state = SessionState::Closed;
            false
        }
    }

    fn close(&mut self) -> Vec<RequestHandle> {
        if self.state != SessionState::Closed {
            debug!(session = %self.id, from = ?self.state, "session closed");
            self.state = SessionState::Closed;
        }
        self.pending_requests.drain().collect()
    }
}

/// Registry of every live session record
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    next_id: u32,
    next_token: u32,
}

impl SessionRegistry {
    /// Empty registry with a randomised token origin
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 0,
            next_token: rand::rngs::OsRng.gen(),
        }
    }

    /// Number of non-closed sessions
    pub fn live_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| !s.state.is_closed())
            .count()
    }

    /// Does the identifier resolve to a record
    pub fn is_valid(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Borrow a record
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// State of the session, `Closed` when the identifier is stale
    pub fn state_or_closed(&self, id: SessionId) -> SessionState {
        self.get(id).map(|s| s.state).unwrap_or(SessionState::Closed)
    }

    /// User of the session, `None` when the identifier is stale
    pub fn user_or_none(&self, id: SessionId) -> Option<UserIdentity> {
        self.get(id).and_then(|s| s.user.clone())
    }

    /// Allocate a fresh record in `Init`
    pub fn init_session(&mut self) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(id, Session::new(id));
        id
    }

    /// Drop a record entirely; its pending handles are returned so the
    /// caller can free them
    pub fn delete_session(&mut self, id: SessionId) -> Vec<RequestHandle> {
        match self.sessions.remove(&id) {
            Some(mut session) => session.close(),
            None => Vec::new(),
        }
    }

    /// Close a session, draining its pending handles
    pub fn close_session(&mut self, id: SessionId) -> Vec<RequestHandle> {
        self.get_mut(id).map(|s| s.close()).unwrap_or_default()
    }

    /// Mint a token unique across live sessions
    fn fresh_token(&mut self) -> SessionToken {
        loop {
            self.next_token = self.next_token.wrapping_add(1);
            if self.next_token == 0 {
                continue;
            }
            let token = SessionToken(self.next_token);
            let in_use = self
                .sessions
                .values()
                .any(|s| !s.state.is_closed() && s.token == Some(token));
            if !in_use {
                return token;
            }
        }
    }

    /// Resolve a token to a live session
    pub fn session_from_token(&self, token: SessionToken) -> Option<SessionId> {
        if !token.is_valid() {
            return None;
        }
        self.sessions
            .values()
            .find(|s| !s.state.is_closed() && s.token == Some(token))
            .map(|s| s.id)
    }

    fn token_in_live_use(&self, token: SessionToken) -> bool {
        self.session_from_token(token).is_some()
    }

    /// Every non-closed session
    pub fn live_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| !s.state.is_closed())
            .map(|s| s.id)
            .collect()
    }

    /// Sessions currently bound to `channel`, any state
    pub fn sessions_on_channel(&self, channel: ChannelHandle) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.channel == Some(channel))
            .map(|s| s.id)
            .collect()
    }

    /// Orphaned sessions whose lost channel carried `config`
    pub fn orphaned_for_config(&self, config: ChannelConfigIdx) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| {
                s.state == SessionState::ScOrphaned && s.orphaned_config == Some(config)
            })
            .map(|s| s.id)
            .collect()
    }

    /// Record a pending request handle on the session
    pub fn add_pending_request(&mut self, id: SessionId, handle: RequestHandle) -> bool {
        match self.get_mut(id) {
            Some(s) => s.pending_requests.insert(handle),
            None => false,
        }
    }

    /// Drop a pending request handle; true when it was present
    pub fn remove_pending_request(&mut self, id: SessionId, handle: RequestHandle) -> bool {
        match self.get_mut(id) {
            Some(s) => s.pending_requests.remove(&handle),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Client-side state machine operations
    // ------------------------------------------------------------------

    /// Fresh client session in `Init`
    pub fn cli_init_session(&mut self) -> SessionId {
        self.init_session()
    }

    /// Client CreateSession request
    ///
    /// Binds the channel, moves `Init → Creating`, records the pending
    /// handle and writes the client nonce into the request.
    pub fn cli_create_req(
        &mut self,
        id: SessionId,
        channel: ChannelHandle,
        req_handle: RequestHandle,
        req_msg: &mut Message,
        surface: &dyn ChannelSurface,
    ) -> StatusCode {
        if !surface.is_valid_channel(channel) || !self.is_valid(id) {
            return StatusCode::BadInvalidState;
        }
        let nonce = fresh_nonce();
        let Some(session) = self.get_mut(id) else {
            return StatusCode::BadInvalidState;
        };
        if session.state != SessionState::Init {
            return StatusCode::BadInvalidArgument;
        }
        session.channel = Some(channel);
        session.set_state(SessionState::Creating);
        session.client_nonce = Some(nonce.clone());
        if !session.pending_requests.insert(req_handle) {
            return StatusCode::BadInvalidArgument;
        }
        req_msg.set_client_nonce(nonce);
        StatusCode::Good
    }

    /// Client CreateSession response
    ///
    /// On a matching channel, a fresh token and a `Good` status the
    /// session reaches `Created`; any mismatch closes it.
    pub fn cli_create_resp(
        &mut self,
        channel: ChannelHandle,
        id: SessionId,
        req_handle: RequestHandle,
        token: Option<SessionToken>,
        resp_msg: &Message,
        surface: &dyn ChannelSurface,
    ) {
        if !self.is_valid(id) {
            return;
        }
        let token_fresh = match token {
            Some(t) => t.is_valid() && !self.token_in_live_use(t),
            None => false,
        };
        let valid_channel = surface.is_valid_channel(channel);
        let server_nonce = resp_msg.server_nonce().cloned();
        let status = resp_msg.service_status();
        let Some(session) = self.get_mut(id) else {
            return;
        };
        let guards_hold = session.state == SessionState::Creating
            && valid_channel
            && session.channel == Some(channel)
            && token_fresh
            && session.token.is_none();
        if guards_hold {
            let handle_known = session.pending_requests.remove(&req_handle);
            if handle_known && status.is_good() {
                session.set_state(SessionState::Created);
                session.token = token;
                session.server_nonce = server_nonce;
                return;
            }
        }
        session.close();
    }

    /// Client ActivateSession request carrying a user identity
    pub fn cli_user_activate_req(
        &mut self,
        id: SessionId,
        req_handle: RequestHandle,
        user: UserIdentity,
        req_msg: &mut Message,
        surface: &dyn ChannelSurface,
    ) -> (StatusCode, Option<ChannelHandle>, Option<SessionToken>) {
        if !self.is_valid(id) {
            return (StatusCode::BadInvalidArgument, None, None);
        }
        let (state, channel, token) = {
            let s = self.get(id).expect("checked above");
            (s.state, s.channel, s.token)
        };
        if !matches!(
            state,
            SessionState::Created | SessionState::UserActivated
        ) {
            return (StatusCode::BadInvalidState, channel, None);
        }
        let channel_ok = channel.map(|c| surface.is_valid_channel(c)).unwrap_or(false);
        let token_ok = token.map(|t| t.is_valid()).unwrap_or(false);
        if !channel_ok || !token_ok {
            return (StatusCode::BadUnexpectedError, channel, None);
        }
        let session = self.get_mut(id).expect("checked above");
        if !session.pending_requests.insert(req_handle) {
            return (StatusCode::BadInvalidArgument, channel, None);
        }
        req_msg.set_activation_user(user.clone());
        session.user = Some(user);
        session.set_state(SessionState::UserActivating);
        (StatusCode::Good, channel, token)
    }

    /// Client reactivation request on a fresh channel after orphaning
    ///
    /// Carries the same user the session last used; a missing user is a
    /// [`StatusCode::BadIdentityTokenInvalid`].
    pub fn cli_sc_activate_req(
        &mut self,
        id: SessionId,
        req_handle: RequestHandle,
        channel: ChannelHandle,
        req_msg: &mut Message,
        surface: &dyn ChannelSurface,
    ) -> (StatusCode, Option<SessionToken>) {
        if !self.is_valid(id) || !surface.is_valid_channel(channel) {
            return (StatusCode::BadInvalidArgument, None);
        }
        let (state, token, user) = {
            let s = self.get(id).expect("checked above");
            (s.state, s.token, s.user.clone())
        };
        if !matches!(
            state,
            SessionState::ScOrphaned | SessionState::UserActivated
        ) {
            return (StatusCode::BadInvalidState, None);
        }
        if token.map(|t| !t.is_valid()).unwrap_or(true) {
            return (StatusCode::BadUnexpectedError, None);
        }
        let session = self.get_mut(id).expect("checked above");
        if !session.pending_requests.insert(req_handle) {
            return (StatusCode::BadInvalidArgument, None);
        }
        match user {
            Some(user) => {
                req_msg.set_activation_user(user);
                session.channel = Some(channel);
                session.set_state(SessionState::ScActivating);
                (StatusCode::Good, token)
            }
            None => {
                session.pending_requests.remove(&req_handle);
                (StatusCode::BadIdentityTokenInvalid, None)
            }
        }
    }

    /// Client ActivateSession response, shared by both activation paths
    pub fn cli_activate_resp(
        &mut self,
        channel: ChannelHandle,
        id: SessionId,
        req_handle: RequestHandle,
        resp_msg: &Message,
        surface: &dyn ChannelSurface,
    ) {
        if !self.is_valid(id) || !surface.is_valid_channel(channel) {
            return;
        }
        let status = resp_msg.service_status();
        let Some(session) = self.get_mut(id) else {
            return;
        };
        let handle_known = session.pending_requests.remove(&req_handle);
        if session.state.is_activating()
            && session.channel == Some(channel)
            && handle_known
            && status.is_good()
        {
            session.set_state(SessionState::UserActivated);
        } else {
            session.close();
        }
    }

    /// Client CloseSession request
    pub fn cli_close_req(
        &mut self,
        id: SessionId,
        req_handle: RequestHandle,
        surface: &dyn ChannelSurface,
    ) -> (StatusCode, Option<ChannelHandle>, Option<SessionToken>) {
        if !self.is_valid(id) {
            return (StatusCode::BadInvalidArgument, None, None);
        }
        let (state, channel, token) = {
            let s = self.get(id).expect("checked above");
            (s.state, s.channel, s.token)
        };
        if state.is_closed() || state == SessionState::Closing {
            return (StatusCode::BadInvalidState, None, None);
        }
        let channel_ok = channel.map(|c| surface.is_valid_channel(c)).unwrap_or(false);
        let token_ok = token.map(|t| t.is_valid()).unwrap_or(false);
        if !channel_ok || !token_ok {
            return (StatusCode::BadInvalidState, None, None);
        }
        let session = self.get_mut(id).expect("checked above");
        if !session.pending_requests.insert(req_handle) {
            return (StatusCode::BadInvalidArgument, None, None);
        }
        session.set_state(SessionState::Closing);
        (StatusCode::Good, channel, token)
    }

    /// Client CloseSession response; the session closes regardless of
    /// the carried status
    pub fn cli_close_resp(&mut self, id: SessionId, req_handle: RequestHandle) {
        if let Some(session) = self.get_mut(id) {
            session.pending_requests.remove(&req_handle);
            session.close();
        }
    }

    /// Unconditional local close
    pub fn cli_close_session(&mut self, id: SessionId) -> Vec<RequestHandle> {
        self.close_session(id)
    }

    /// Client channel loss
    ///
    /// Sessions in `UserActivated` move to `ScOrphaned` when a
    /// replacement channel exists; everything else closes. Returns the
    /// orphaned sessions and the request handles freed by the closes.
    pub fn cli_secure_channel_lost(
        &mut self,
        lost: ChannelHandle,
        replacement: Option<ChannelHandle>,
        lost_config: Option<ChannelConfigIdx>,
    ) -> (Vec<SessionId>, Vec<RequestHandle>) {
        let bound = self.sessions_on_channel(lost);
        let mut orphaned = Vec::new();
        let mut freed = Vec::new();
        for id in bound {
            let Some(session) = self.get_mut(id) else {
                continue;
            };
            if session.state == SessionState::UserActivated && replacement.is_some() {
                session.orphaned_from = Some(lost);
                session.orphaned_config = lost_config;
                session.replacement_channel = replacement;
                session.set_state(SessionState::ScOrphaned);
                orphaned.push(id);
            } else {
                freed.extend(session.close());
            }
        }
        (orphaned, freed)
    }

    /// Mint a service-request token pair: records the pending handle and
    /// returns the session token to attach
    pub fn cli_new_session_service_req(
        &mut self,
        id: SessionId,
        req_handle: RequestHandle,
    ) -> (StatusCode, Option<SessionToken>) {
        let token = match self.get(id).and_then(|s| s.token) {
            Some(t) if t.is_valid() => t,
            _ => return (StatusCode::BadUnexpectedError, None),
        };
        if self.add_pending_request(id, req_handle) {
            (StatusCode::Good, Some(token))
        } else {
            (StatusCode::BadInvalidArgument, None)
        }
    }

    /// Record a service response, dropping the pending handle
    pub fn cli_record_session_service_resp(
        &mut self,
        id: SessionId,
        req_handle: RequestHandle,
    ) -> bool {
        self.remove_pending_request(id, req_handle)
    }

    /// Client-side service validity: activated and on the right channel;
    /// anything else closes the session
    pub fn cli_is_session_valid_for_service(
        &mut self,
        channel: ChannelHandle,
        id: SessionId,
        surface: &dyn ChannelSurface,
    ) -> bool {
        if !self.is_valid(id) {
            return false;
        }
        let ok = {
            let s = self.get(id).expect("checked above");
            s.channel == Some(channel)
                && surface.is_valid_channel(channel)
                && s.state == SessionState::UserActivated
        };
        if !ok {
            self.close_session(id);
        }
        ok
    }

    // ------------------------------------------------------------------
    // Server-side state machine operations
    // ------------------------------------------------------------------

    /// Server CreateSession: mint a session and its token, populate the
    /// response
    pub fn srv_create_req_and_resp(
        &mut self,
        channel: ChannelHandle,
        req_msg: &Message,
        resp_msg: &mut Message,
        surface: &dyn ChannelSurface,
    ) -> Option<SessionId> {
        if !surface.is_valid_channel(channel) {
            return None;
        }
        let id = self.init_session();
        let token = self.fresh_token();
        let server_nonce = fresh_nonce();
        let client_nonce = req_msg.client_nonce().cloned();
        let session = self.get_mut(id).expect("freshly inserted");
        session.channel = Some(channel);
        session.set_state(SessionState::Created);
        session.token = Some(token);
        session.client_nonce = client_nonce;
        session.server_nonce = Some(server_nonce.clone());
        resp_msg.set_session_token(token);
        resp_msg.set_server_nonce(server_nonce);
        resp_msg.set_service_status(StatusCode::Good);
        Some(id)
    }

    /// Server ActivateSession: request and response in one step
    ///
    /// A reactivation may change the channel or the user, never both;
    /// attempting both is an identity-token failure and closes the
    /// session.
    pub fn srv_activate_req_and_resp(
        &mut self,
        channel: ChannelHandle,
        id: SessionId,
        user: Option<UserIdentity>,
        resp_msg: &mut Message,
    ) -> StatusCode {
        if !self.is_valid(id) {
            return StatusCode::BadSessionIdInvalid;
        }
        let Some(user) = user else {
            self.close_session(id);
            return StatusCode::BadIdentityTokenInvalid;
        };
        let (state, bound_channel, bound_user, token) = {
            let s = self.get(id).expect("checked above");
            (s.state, s.channel, s.user.clone(), s.token)
        };
        if token.map(|t| !t.is_valid()).unwrap_or(true) {
            self.close_session(id);
            return StatusCode::BadUnexpectedError;
        }
        let same_channel = bound_channel == Some(channel);
        let same_user = bound_user.as_ref() == Some(&user);
        let accept = match state {
            SessionState::Created => same_channel,
            SessionState::UserActivated => {
                // one of the two may change, not both, and not neither
                (same_channel && !same_user) || (!same_channel && same_user)
            }
            _ => {
                self.close_session(id);
                return StatusCode::BadInvalidState;
            }
        };
        if !accept {
            self.close_session(id);
            return if state == SessionState::UserActivated && !same_channel && !same_user {
                StatusCode::BadIdentityTokenInvalid
            } else {
                StatusCode::BadInvalidArgument
            };
        }
        let session = self.get_mut(id).expect("checked above");
        session.user = Some(user);
        session.channel = Some(channel);
        session.set_state(SessionState::UserActivated);
        resp_msg.set_service_status(StatusCode::Good);
        StatusCode::Good
    }

    /// Server CloseSession: request and response in one step; the
    /// session always ends closed
    pub fn srv_close_req_and_resp(
        &mut self,
        channel: ChannelHandle,
        id: SessionId,
        resp_msg: &mut Message,
    ) -> StatusCode {
        if !self.is_valid(id) {
            return StatusCode::BadSessionIdInvalid;
        }
        let (state, bound_channel, token) = {
            let s = self.get(id).expect("checked above");
            (s.state, s.channel, s.token)
        };
        let ret = if state == SessionState::UserActivated && bound_channel == Some(channel) {
            if token.map(|t| t.is_valid()).unwrap_or(false) {
                resp_msg.set_service_status(StatusCode::Good);
                StatusCode::Good
            } else {
                StatusCode::BadUnexpectedError
            }
        } else if state == SessionState::UserActivated {
            StatusCode::BadInvalidArgument
        } else {
            StatusCode::BadInvalidState
        };
        self.close_session(id);
        ret
    }

    /// Unconditional server-side close
    pub fn srv_close_session(&mut self, id: SessionId) -> Vec<RequestHandle> {
        self.close_session(id)
    }

    /// Server channel loss: servers never migrate sessions across
    /// channels, every bound session closes
    pub fn srv_secure_channel_lost(&mut self, channel: ChannelHandle) -> Vec<RequestHandle> {
        let mut freed = Vec::new();
        for id in self.sessions_on_channel(channel) {
            freed.extend(self.close_session(id));
        }
        freed
    }

    /// Server-side service validity
    ///
    /// Returns `(valid, send_error_response)`. A wrong state on the
    /// right channel warrants an error response; a wrong channel gets
    /// silence. Either way the session closes when invalid.
    pub fn srv_is_session_valid_for_service(
        &mut self,
        channel: ChannelHandle,
        id: SessionId,
        surface: &dyn ChannelSurface,
    ) -> (bool, bool) {
        if !self.is_valid(id) {
            return (false, false);
        }
        let (state, bound_channel) = {
            let s = self.get(id).expect("checked above");
            (s.state, s.channel)
        };
        let channel_ok =
            bound_channel == Some(channel) && surface.is_valid_channel(channel);
        let (valid, snd_err) = if channel_ok {
            if state == SessionState::UserActivated {
                (true, false)
            } else {
                (false, true)
            }
        } else {
            (false, false)
        };
        if !valid {
            self.close_session(id);
        }
        (valid, snd_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LoopbackChannels;
    use crate::message::MessageType;

    fn setup() -> (SessionRegistry, LoopbackChannels, ChannelHandle) {
        let mut surface = LoopbackChannels::new();
        let ch = surface.add_channel(ChannelConfigIdx::client(1).unwrap());
        (SessionRegistry::new(), surface, ch)
    }

    #[test]
    fn test_init_session_has_no_channel_or_token() {
        let (mut reg, _, _) = setup();
        let id = reg.cli_init_session();
        let s = reg.get(id).unwrap();
        assert_eq!(s.state(), SessionState::Init);
        assert!(s.channel().is_none());
        assert!(s.token().is_none());
    }

    #[test]
    fn test_token_uniqueness_across_live_sessions() {
        let (mut reg, surface, ch) = setup();
        let mut tokens = std::collections::HashSet::new();
        for _ in 0..64 {
            let req = Message::alloc(MessageType::CreateSessionRequest);
            let mut resp = Message::alloc(MessageType::CreateSessionResponse);
            let id = reg
                .srv_create_req_and_resp(ch, &req, &mut resp, &surface)
                .unwrap();
            let token = reg.get(id).unwrap().token().unwrap();
            assert!(tokens.insert(token), "token reused across live sessions");
        }
    }

    #[test]
    fn test_server_create_and_activate() {
        let (mut reg, surface, ch) = setup();
        let req = Message::alloc(MessageType::CreateSessionRequest);
        let mut resp = Message::alloc(MessageType::CreateSessionResponse);
        let id = reg
            .srv_create_req_and_resp(ch, &req, &mut resp, &surface)
            .unwrap();
        assert_eq!(reg.state_or_closed(id), SessionState::Created);
        assert!(resp.session_token().is_some());
        assert!(resp.server_nonce().is_some());

        let mut act_resp = Message::alloc(MessageType::ActivateSessionResponse);
        let ret = reg.srv_activate_req_and_resp(
            ch,
            id,
            Some(UserIdentity::from_token(b"operator".to_vec())),
            &mut act_resp,
        );
        assert_eq!(ret, StatusCode::Good);
        assert_eq!(reg.state_or_closed(id), SessionState::UserActivated);
    }

    #[test]
    fn test_server_rejects_channel_and_user_double_change() {
        let (mut reg, mut surface, ch) = setup();
        let req = Message::alloc(MessageType::CreateSessionRequest);
        let mut resp = Message::alloc(MessageType::CreateSessionResponse);
        let id = reg
            .srv_create_req_and_resp(ch, &req, &mut resp, &surface)
            .unwrap();
        let mut act = Message::alloc(MessageType::ActivateSessionResponse);
        reg.srv_activate_req_and_resp(
            ch,
            id,
            Some(UserIdentity::from_token(b"alice".to_vec())),
            &mut act,
        );

        let other = surface.add_channel(ChannelConfigIdx::server(1).unwrap());
        let mut act2 = Message::alloc(MessageType::ActivateSessionResponse);
        let ret = reg.srv_activate_req_and_resp(
            other,
            id,
            Some(UserIdentity::from_token(b"mallory".to_vec())),
            &mut act2,
        );
        assert_eq!(ret, StatusCode::BadIdentityTokenInvalid);
        assert_eq!(reg.state_or_closed(id), SessionState::Closed);
    }

    #[test]
    fn test_server_allows_single_change_reactivation() {
        let (mut reg, mut surface, ch) = setup();
        let req = Message::alloc(MessageType::CreateSessionRequest);
        let mut resp = Message::alloc(MessageType::CreateSessionResponse);
        let id = reg
            .srv_create_req_and_resp(ch, &req, &mut resp, &surface)
            .unwrap();
        let alice = UserIdentity::from_token(b"alice".to_vec());
        let mut act = Message::alloc(MessageType::ActivateSessionResponse);
        reg.srv_activate_req_and_resp(ch, id, Some(alice.clone()), &mut act);

        // channel transfer with the same user
        let other = surface.add_channel(ChannelConfigIdx::server(1).unwrap());
        let mut act2 = Message::alloc(MessageType::ActivateSessionResponse);
        let ret = reg.srv_activate_req_and_resp(other, id, Some(alice), &mut act2);
        assert_eq!(ret, StatusCode::Good);
        assert_eq!(reg.state_or_closed(id), SessionState::UserActivated);

        // user change on the (new) same channel
        let mut act3 = Message::alloc(MessageType::ActivateSessionResponse);
        let ret = reg.srv_activate_req_and_resp(
            other,
            id,
            Some(UserIdentity::from_token(b"bob".to_vec())),
            &mut act3,
        );
        assert_eq!(ret, StatusCode::Good);
    }

    #[test]
    fn test_client_full_lifecycle() {
        let (mut reg, surface, ch) = setup();
        let id = reg.cli_init_session();
        let h1 = RequestHandle(1);
        let mut req = Message::alloc(MessageType::CreateSessionRequest);
        assert_eq!(
            reg.cli_create_req(id, ch, h1, &mut req, &surface),
            StatusCode::Good
        );
        assert_eq!(reg.state_or_closed(id), SessionState::Creating);
        assert!(req.client_nonce().is_some());

        let mut resp = Message::alloc(MessageType::CreateSessionResponse);
        resp.set_service_status(StatusCode::Good);
        reg.cli_create_resp(ch, id, h1, Some(SessionToken(77)), &resp, &surface);
        assert_eq!(reg.state_or_closed(id), SessionState::Created);
        assert_eq!(reg.get(id).unwrap().token(), Some(SessionToken(77)));

        let h2 = RequestHandle(2);
        let mut act_req = Message::alloc(MessageType::ActivateSessionRequest);
        let (ret, channel, token) = reg.cli_user_activate_req(
            id,
            h2,
            UserIdentity::from_token(b"operator".to_vec()),
            &mut act_req,
            &surface,
        );
        assert_eq!(ret, StatusCode::Good);
        assert_eq!(channel, Some(ch));
        assert_eq!(token, Some(SessionToken(77)));
        assert_eq!(reg.state_or_closed(id), SessionState::UserActivating);

        let act_resp = Message::alloc(MessageType::ActivateSessionResponse);
        reg.cli_activate_resp(ch, id, h2, &act_resp, &surface);
        assert_eq!(reg.state_or_closed(id), SessionState::UserActivated);

        let h3 = RequestHandle(3);
        let (ret, channel, token) = reg.cli_close_req(id, h3, &surface);
        assert_eq!(ret, StatusCode::Good);
        assert_eq!(channel, Some(ch));
        assert!(token.is_some());
        assert_eq!(reg.state_or_closed(id), SessionState::Closing);

        reg.cli_close_resp(id, h3);
        assert_eq!(reg.state_or_closed(id), SessionState::Closed);
        assert_eq!(reg.get(id).unwrap().pending_requests().count(), 0);
    }

    #[test]
    fn test_create_resp_with_bad_status_closes() {
        let (mut reg, surface, ch) = setup();
        let id = reg.cli_init_session();
        let h = RequestHandle(1);
        let mut req = Message::alloc(MessageType::CreateSessionRequest);
        reg.cli_create_req(id, ch, h, &mut req, &surface);
        let mut resp = Message::alloc(MessageType::CreateSessionResponse);
        resp.set_service_status(StatusCode::BadOutOfMemory);
        reg.cli_create_resp(ch, id, h, Some(SessionToken(5)), &resp, &surface);
        assert_eq!(reg.state_or_closed(id), SessionState::Closed);
    }

    #[test]
    fn test_orphaning_and_reactivation() {
        let (mut reg, mut surface, ch) = setup();
        let id = reg.cli_init_session();
        let cfg = surface.config_index(ch).unwrap();
        // drive to activated
        let mut m = Message::alloc(MessageType::CreateSessionRequest);
        reg.cli_create_req(id, ch, RequestHandle(1), &mut m, &surface);
        let resp = Message::alloc(MessageType::CreateSessionResponse);
        reg.cli_create_resp(ch, id, RequestHandle(1), Some(SessionToken(9)), &resp, &surface);
        let mut act = Message::alloc(MessageType::ActivateSessionRequest);
        reg.cli_user_activate_req(
            id,
            RequestHandle(2),
            UserIdentity::anonymous(),
            &mut act,
            &surface,
        );
        reg.cli_activate_resp(
            ch,
            id,
            RequestHandle(2),
            &Message::alloc(MessageType::ActivateSessionResponse),
            &surface,
        );
        assert_eq!(reg.state_or_closed(id), SessionState::UserActivated);

        // lose the channel with a replacement available
        let replacement = surface.add_channel(cfg);
        let (orphaned, _) = reg.cli_secure_channel_lost(ch, Some(replacement), Some(cfg));
        assert_eq!(orphaned, vec![id]);
        assert_eq!(reg.state_or_closed(id), SessionState::ScOrphaned);
        assert_eq!(reg.orphaned_for_config(cfg), vec![id]);

        // reactivate on the replacement, same user
        let mut react = Message::alloc(MessageType::ActivateSessionRequest);
        let (ret, token) =
            reg.cli_sc_activate_req(id, RequestHandle(3), replacement, &mut react, &surface);
        assert_eq!(ret, StatusCode::Good);
        assert_eq!(token, Some(SessionToken(9)));
        assert_eq!(reg.state_or_closed(id), SessionState::ScActivating);
        assert_eq!(react.activation_user(), Some(&UserIdentity::anonymous()));

        reg.cli_activate_resp(
            replacement,
            id,
            RequestHandle(3),
            &Message::alloc(MessageType::ActivateSessionResponse),
            &surface,
        );
        assert_eq!(reg.state_or_closed(id), SessionState::UserActivated);
    }

    #[test]
    fn test_channel_loss_without_replacement_closes() {
        let (mut reg, surface, ch) = setup();
        let id = reg.cli_init_session();
        let mut m = Message::alloc(MessageType::CreateSessionRequest);
        reg.cli_create_req(id, ch, RequestHandle(1), &mut m, &surface);
        let (orphaned, freed) = reg.cli_secure_channel_lost(ch, None, None);
        assert!(orphaned.is_empty());
        assert_eq!(freed, vec![RequestHandle(1)]);
        assert_eq!(reg.state_or_closed(id), SessionState::Closed);
    }

    #[test]
    fn test_service_validity_closes_wrong_state() {
        let (mut reg, surface, ch) = setup();
        let req = Message::alloc(MessageType::CreateSessionRequest);
        let mut resp = Message::alloc(MessageType::CreateSessionResponse);
        let id = reg
            .srv_create_req_and_resp(ch, &req, &mut resp, &surface)
            .unwrap();
        // Created, not activated: error response warranted, session closes
        let (valid, snd_err) = reg.srv_is_session_valid_for_service(ch, id, &surface);
        assert!(!valid);
        assert!(snd_err);
        assert_eq!(reg.state_or_closed(id), SessionState::Closed);
    }

    #[test]
    fn test_token_lookup_ignores_closed_sessions() {
        let (mut reg, surface, ch) = setup();
        let req = Message::alloc(MessageType::CreateSessionRequest);
        let mut resp = Message::alloc(MessageType::CreateSessionResponse);
        let id = reg
            .srv_create_req_and_resp(ch, &req, &mut resp, &surface)
            .unwrap();
        let token = reg.get(id).unwrap().token().unwrap();
        assert_eq!(reg.session_from_token(token), Some(id));
        reg.close_session(id);
        assert_eq!(reg.session_from_token(token), None);
    }
}
