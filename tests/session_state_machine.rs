//! Session state machine coverage through the registry operations
//!
//! Every state sequence a session goes through must be a valid path in
//! the lifecycle diagram, and `Closed` must terminate it.

use opcua_stack::channel::{ChannelConfigIdx, ChannelSurface, LoopbackChannels};
use opcua_stack::error::StatusCode;
use opcua_stack::message::{Message, MessageType};
use opcua_stack::session::{SessionRegistry, SessionState};
use opcua_stack::types::{RequestHandle, SessionId, SessionToken, UserIdentity};

// ============================================================================
// Test Helpers
// ============================================================================

struct Recorder {
    registry: SessionRegistry,
    surface: LoopbackChannels,
    channel: opcua_stack::types::ChannelHandle,
    session: SessionId,
    states: Vec<SessionState>,
}

impl Recorder {
    fn new() -> Self {
        let mut surface = LoopbackChannels::new();
        let channel = surface.add_channel(ChannelConfigIdx::client(1).unwrap());
        let mut registry = SessionRegistry::new();
        let session = registry.cli_init_session();
        let initial = registry.state_or_closed(session);
        Self {
            registry,
            surface,
            channel,
            session,
            states: vec![initial],
        }
    }

    fn record(&mut self) {
        let state = self.registry.state_or_closed(self.session);
        if self.states.last() != Some(&state) {
            self.states.push(state);
        }
    }

    fn assert_monotone(&self) {
        for pair in self.states.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "invalid transition {:?} -> {:?} in {:?}",
                pair[0],
                pair[1],
                self.states
            );
        }
        if let Some(pos) = self.states.iter().position(|s| s.is_closed()) {
            assert_eq!(pos, self.states.len() - 1, "states recorded after closed");
        }
    }
}

// ============================================================================
// Recorded sequences are valid paths
// ============================================================================

#[test]
fn test_happy_path_sequence_is_valid() {
    let mut r = Recorder::new();

    let mut msg = Message::alloc(MessageType::CreateSessionRequest);
    r.registry
        .cli_create_req(r.session, r.channel, RequestHandle(1), &mut msg, &r.surface);
    r.record();

    let mut resp = Message::alloc(MessageType::CreateSessionResponse);
    resp.set_service_status(StatusCode::Good);
    r.registry.cli_create_resp(
        r.channel,
        r.session,
        RequestHandle(1),
        Some(SessionToken(42)),
        &resp,
        &r.surface,
    );
    r.record();

    let mut act = Message::alloc(MessageType::ActivateSessionRequest);
    r.registry.cli_user_activate_req(
        r.session,
        RequestHandle(2),
        UserIdentity::from_token(b"op".to_vec()),
        &mut act,
        &r.surface,
    );
    r.record();

    r.registry.cli_activate_resp(
        r.channel,
        r.session,
        RequestHandle(2),
        &Message::alloc(MessageType::ActivateSessionResponse),
        &r.surface,
    );
    r.record();

    r.registry.cli_close_req(r.session, RequestHandle(3), &r.surface);
    r.record();
    r.registry.cli_close_resp(r.session, RequestHandle(3));
    r.record();

    assert_eq!(
        r.states,
        vec![
            SessionState::Init,
            SessionState::Creating,
            SessionState::Created,
            SessionState::UserActivating,
            SessionState::UserActivated,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
    r.assert_monotone();
}

#[test]
fn test_orphaning_sequence_is_valid() {
    let mut r = Recorder::new();
    let config = r.surface.config_index(r.channel).unwrap();

    let mut msg = Message::alloc(MessageType::CreateSessionRequest);
    r.registry
        .cli_create_req(r.session, r.channel, RequestHandle(1), &mut msg, &r.surface);
    r.record();
    let resp = {
        let mut m = Message::alloc(MessageType::CreateSessionResponse);
        m.set_service_status(StatusCode::Good);
        m
    };
    r.registry.cli_create_resp(
        r.channel,
        r.session,
        RequestHandle(1),
        Some(SessionToken(9)),
        &resp,
        &r.surface,
    );
    r.record();
    let mut act = Message::alloc(MessageType::ActivateSessionRequest);
    r.registry.cli_user_activate_req(
        r.session,
        RequestHandle(2),
        UserIdentity::anonymous(),
        &mut act,
        &r.surface,
    );
    r.record();
    r.registry.cli_activate_resp(
        r.channel,
        r.session,
        RequestHandle(2),
        &Message::alloc(MessageType::ActivateSessionResponse),
        &r.surface,
    );
    r.record();

    let replacement = r.surface.add_channel(config);
    r.registry
        .cli_secure_channel_lost(r.channel, Some(replacement), Some(config));
    r.record();

    let mut react = Message::alloc(MessageType::ActivateSessionRequest);
    r.registry
        .cli_sc_activate_req(r.session, RequestHandle(3), replacement, &mut react, &r.surface);
    r.record();
    r.registry.cli_activate_resp(
        replacement,
        r.session,
        RequestHandle(3),
        &Message::alloc(MessageType::ActivateSessionResponse),
        &r.surface,
    );
    r.record();

    // The orphaned interval is exactly one recorded state.
    assert_eq!(
        r.states,
        vec![
            SessionState::Init,
            SessionState::Creating,
            SessionState::Created,
            SessionState::UserActivating,
            SessionState::UserActivated,
            SessionState::ScOrphaned,
            SessionState::ScActivating,
            SessionState::UserActivated,
        ]
    );
    r.assert_monotone();
}

#[test]
fn test_failure_sequences_terminate_at_closed() {
    // A bad create response closes immediately and nothing reopens it.
    let mut r = Recorder::new();
    let mut msg = Message::alloc(MessageType::CreateSessionRequest);
    r.registry
        .cli_create_req(r.session, r.channel, RequestHandle(1), &mut msg, &r.surface);
    r.record();
    let mut resp = Message::alloc(MessageType::CreateSessionResponse);
    resp.set_service_status(StatusCode::BadOutOfMemory);
    r.registry.cli_create_resp(
        r.channel,
        r.session,
        RequestHandle(1),
        Some(SessionToken(1)),
        &resp,
        &r.surface,
    );
    r.record();
    r.assert_monotone();
    assert!(r.states.last().unwrap().is_closed());

    // Operations on a closed session do not revive it.
    let mut act = Message::alloc(MessageType::ActivateSessionRequest);
    let (ret, _, _) = r.registry.cli_user_activate_req(
        r.session,
        RequestHandle(2),
        UserIdentity::anonymous(),
        &mut act,
        &r.surface,
    );
    assert_eq!(ret, StatusCode::BadInvalidState);
    r.record();
    r.assert_monotone();
}

#[test]
fn test_activate_on_wrong_channel_closes() {
    let mut r = Recorder::new();
    let other = r.surface.add_channel(ChannelConfigIdx::client(2).unwrap());

    let mut msg = Message::alloc(MessageType::CreateSessionRequest);
    r.registry
        .cli_create_req(r.session, r.channel, RequestHandle(1), &mut msg, &r.surface);
    let mut resp = Message::alloc(MessageType::CreateSessionResponse);
    resp.set_service_status(StatusCode::Good);
    r.registry.cli_create_resp(
        r.channel,
        r.session,
        RequestHandle(1),
        Some(SessionToken(5)),
        &resp,
        &r.surface,
    );
    let mut act = Message::alloc(MessageType::ActivateSessionRequest);
    r.registry.cli_user_activate_req(
        r.session,
        RequestHandle(2),
        UserIdentity::anonymous(),
        &mut act,
        &r.surface,
    );
    // Response arrives on a different channel than the session is bound
    // to: mismatch, closed.
    r.registry.cli_activate_resp(
        other,
        r.session,
        RequestHandle(2),
        &Message::alloc(MessageType::ActivateSessionResponse),
        &r.surface,
    );
    assert!(r.registry.state_or_closed(r.session).is_closed());
}
