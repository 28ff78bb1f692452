//! I/O dispatcher: event queue, message routing, response fabrication
//!
//! Single-threaded cooperative model. The transport appends events to
//! the queue; [`Dispatcher::pump`] drains it to completion, and no
//! handler yields mid-transition, so a session's state changes are
//! totally ordered. Sends are non-blocking — the channel surface may
//! reject synchronously and every send failure rolls back by freeing
//! the request handle and closing the session involved.

use crate::channel::{ChannelConfigIdx, ChannelSurface};
use crate::error::StatusCode;
use crate::message::{Message, MessageType};
use crate::session::{RequestHandleTable, SessionRegistry};
use crate::types::{ChannelHandle, RequestHandle, SessionId, UserIdentity};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Application-originated requests
#[derive(Debug, Clone)]
pub enum AppRequest {
    /// Create (and later activate) a session on a configuration
    CreateSession {
        /// Client-side channel configuration to use
        config: ChannelConfigIdx,
    },
    /// Activate a session with a user identity
    ActivateSession {
        /// Session to activate
        session: SessionId,
        /// Identity to present
        user: UserIdentity,
    },
    /// Close a session
    CloseSession {
        /// Session to close
        session: SessionId,
    },
    /// Send a session-scoped service request
    ServiceRequest {
        /// Issuing session
        session: SessionId,
        /// Request message (read/write/browse)
        message: Message,
    },
}

/// Events consumed by the dispatcher
#[derive(Debug, Clone)]
pub enum Event {
    /// A decoded message arrived on a channel
    MessageReceived {
        /// Originating channel
        channel: ChannelHandle,
        /// The decoded message
        message: Message,
    },
    /// A secure channel finished connecting
    ChannelConnected {
        /// The channel
        channel: ChannelHandle,
    },
    /// A secure channel dropped
    ChannelLost {
        /// The channel
        channel: ChannelHandle,
    },
    /// A connection attempt timed out
    ConnectionTimeout {
        /// The channel
        channel: ChannelHandle,
    },
    /// A server-side channel was accepted by the transport
    NewServerChannel {
        /// The channel
        channel: ChannelHandle,
    },
    /// Application request
    AppRequest(AppRequest),
}

/// Server-side service treatment (read/write/browse)
pub trait ServiceHandler {
    /// Fill `response` from `request`; the session is already validated
    fn treat_request(&mut self, request: &Message, response: &mut Message);
}

/// Client-side application callback for service responses
pub trait ClientResponseSink {
    /// A validated service response arrived for `session`
    fn service_response(&mut self, session: SessionId, response: &Message, status: StatusCode);
}

/// The I/O dispatcher
pub struct Dispatcher<C, S, A> {
    channels: C,
    services: S,
    app: A,
    sessions: SessionRegistry,
    handles: RequestHandleTable,
    queue: VecDeque<Event>,
}

impl<C, S, A> Dispatcher<C, S, A>
where
    C: ChannelSurface,
    S: ServiceHandler,
    A: ClientResponseSink,
{
    /// Build a dispatcher over the three collaborators
    pub fn new(channels: C, services: S, app: A) -> Self {
        Self {
            channels,
            services,
            app,
            sessions: SessionRegistry::new(),
            handles: RequestHandleTable::new(),
            queue: VecDeque::new(),
        }
    }

    /// The session registry (observers and tests)
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The request handle table (observers and tests)
    pub fn handles(&self) -> &RequestHandleTable {
        &self.handles
    }

    /// The channel surface
    pub fn channels(&self) -> &C {
        &self.channels
    }

    /// Mutable access to the channel surface
    pub fn channels_mut(&mut self) -> &mut C {
        &mut self.channels
    }

    /// The application sink
    pub fn app(&self) -> &A {
        &self.app
    }

    /// Append an event to the queue
    pub fn enqueue(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Drain the queue to completion
    pub fn pump(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::MessageReceived { channel, message } => self.on_message(channel, message),
            Event::ChannelConnected { channel } => self.on_channel_connected(channel),
            Event::ChannelLost { channel } => self.on_channel_lost(channel),
            Event::ConnectionTimeout { channel } => self.on_connection_timeout(channel),
            Event::NewServerChannel { channel } => {
                // Sessions appear on the channel only once requests do.
                debug!(%channel, "server channel accepted");
            }
            Event::AppRequest(req) => match req {
                AppRequest::CreateSession { config } => {
                    self.create_session(config);
                }
                AppRequest::ActivateSession { session, user } => {
                    self.activate_session(session, user);
                }
                AppRequest::CloseSession { session } => {
                    self.close_session(session);
                }
                AppRequest::ServiceRequest { session, message } => {
                    self.send_service_request(session, message);
                }
            },
        }
    }

    /// Close a session locally and free every handle it owns
    fn close_session_cleanup(&mut self, session: SessionId) {
        for handle in self.sessions.close_session(session) {
            self.handles.remove(handle);
        }
        for handle in self.handles.remove_all_for_session(session) {
            self.sessions.remove_pending_request(session, handle);
        }
    }

    // ------------------------------------------------------------------
    // Inbound message routing
    // ------------------------------------------------------------------

    /// Single entry point for decoded messages
    pub fn on_message(&mut self, channel: ChannelHandle, message: Message) {
        if !self.channels.is_valid_channel(channel) {
            // Unknown channel: no outgoing event, no session mutation.
            warn!(%channel, "message on unknown channel dropped");
            return;
        }
        let msg_type = message.msg_type();
        if msg_type.is_channel_level() {
            self.channels.receive_channel_message(channel, message);
            return;
        }
        let is_client = self.channels.is_client_channel(channel);
        let is_request = msg_type.is_request();
        if is_client && !is_request {
            self.on_client_response(channel, message);
        } else if !is_client && is_request {
            self.on_server_request(channel, message);
        } else {
            debug!(%channel, ?msg_type, "message kind does not match channel role, dropped");
        }
    }

    fn on_client_response(&mut self, channel: ChannelHandle, message: Message) {
        let msg_type = message.msg_type();
        let Some(handle) = message.request_handle() else {
            debug!(%channel, "response without request handle dropped");
            return;
        };
        if !self.handles.validate(handle, msg_type) {
            warn!(%channel, %handle, ?msg_type, "response with stale or mismatched handle dropped");
            return;
        }
        match msg_type {
            MessageType::CreateSessionResponse
            | MessageType::ActivateSessionResponse
            | MessageType::CloseSessionResponse => {
                let Some(session) = self.handles.take_session(handle) else {
                    self.handles.remove(handle);
                    return;
                };
                match msg_type {
                    MessageType::CreateSessionResponse => {
                        let token = message.session_token();
                        self.sessions.cli_create_resp(
                            channel,
                            session,
                            handle,
                            token,
                            &message,
                            &self.channels,
                        );
                    }
                    MessageType::ActivateSessionResponse => {
                        self.sessions.cli_activate_resp(
                            channel,
                            session,
                            handle,
                            &message,
                            &self.channels,
                        );
                    }
                    MessageType::CloseSessionResponse => {
                        self.sessions.cli_close_resp(session, handle);
                    }
                    _ => unreachable!(),
                }
                self.handles.remove(handle);
                if self.sessions.state_or_closed(session).is_closed() {
                    self.close_session_cleanup(session);
                }
            }
            t if t.is_session_service_response() => {
                let Some(session) = self.handles.take_session(handle) else {
                    self.handles.remove(handle);
                    return;
                };
                self.handles.remove(handle);
                let recorded = self
                    .sessions
                    .cli_record_session_service_resp(session, handle);
                let valid = self
                    .sessions
                    .cli_is_session_valid_for_service(channel, session, &self.channels);
                if recorded && valid {
                    let status = message.service_status();
                    self.app.service_response(session, &message, status);
                } else if !valid {
                    self.close_session_cleanup(session);
                }
            }
            _ => debug!(%channel, ?msg_type, "unhandled response kind"),
        }
    }

    fn on_server_request(&mut self, channel: ChannelHandle, message: Message) {
        let msg_type = message.msg_type();
        let handle = message.request_handle().unwrap_or(RequestHandle(0));
        match msg_type {
            MessageType::CreateSessionRequest
            | MessageType::ActivateSessionRequest
            | MessageType::CloseSessionRequest => {
                let resp_type = msg_type.response_for().expect("request kinds pair");
                let mut response = Message::alloc(resp_type);
                let session = match msg_type {
                    MessageType::CreateSessionRequest => {
                        let minted = self.sessions.srv_create_req_and_resp(
                            channel,
                            &message,
                            &mut response,
                            &self.channels,
                        );
                        if minted.is_none() {
                            response.set_service_status(StatusCode::BadUnexpectedError);
                        }
                        minted
                    }
                    MessageType::ActivateSessionRequest => {
                        let session = message
                            .session_token()
                            .and_then(|t| self.sessions.session_from_token(t));
                        match session {
                            Some(s) => {
                                let user = message.activation_user().cloned();
                                let ret = self.sessions.srv_activate_req_and_resp(
                                    channel,
                                    s,
                                    user,
                                    &mut response,
                                );
                                if !ret.is_good() {
                                    response.set_service_status(ret);
                                    self.close_session_cleanup(s);
                                }
                                Some(s)
                            }
                            None => {
                                response.set_service_status(StatusCode::BadSessionIdInvalid);
                                None
                            }
                        }
                    }
                    MessageType::CloseSessionRequest => {
                        let session = message
                            .session_token()
                            .and_then(|t| self.sessions.session_from_token(t));
                        match session {
                            Some(s) => {
                                let ret = self.sessions.srv_close_req_and_resp(
                                    channel,
                                    s,
                                    &mut response,
                                );
                                if !ret.is_good() {
                                    response.set_service_status(ret);
                                }
                                self.close_session_cleanup(s);
                                Some(s)
                            }
                            None => {
                                response.set_service_status(StatusCode::BadSessionIdInvalid);
                                None
                            }
                        }
                    }
                    _ => unreachable!(),
                };
                response.set_request_handle(handle);
                let sent = self.channels.send_on_channel(channel, response);
                if !sent.is_good() {
                    if let Some(s) = session {
                        warn!(%channel, session = %s, "response enqueue failed, closing session");
                        self.close_session_cleanup(s);
                    }
                }
            }
            t if t.is_session_service_request() => {
                let resp_type = t.response_for().expect("request kinds pair");
                let session = message
                    .session_token()
                    .and_then(|tk| self.sessions.session_from_token(tk));
                let (valid, send_error) = match session {
                    Some(s) => self
                        .sessions
                        .srv_is_session_valid_for_service(channel, s, &self.channels),
                    None => (false, false),
                };
                if valid {
                    let mut response = Message::alloc(resp_type);
                    self.services.treat_request(&message, &mut response);
                    response.set_request_handle(handle);
                    self.channels.send_on_channel(channel, response);
                } else if send_error {
                    let mut response = Message::alloc(resp_type);
                    response.set_request_handle(handle);
                    response.set_service_status(StatusCode::BadSessionClosed);
                    self.channels.send_on_channel(channel, response);
                }
            }
            _ => debug!(%channel, ?msg_type, "unhandled request kind"),
        }
    }

    // ------------------------------------------------------------------
    // Channel lifecycle events
    // ------------------------------------------------------------------

    /// A channel connected; reactivate any session orphaned on its
    /// configuration
    pub fn on_channel_connected(&mut self, channel: ChannelHandle) {
        if !self.channels.is_valid_channel(channel) || !self.channels.is_client_channel(channel) {
            return;
        }
        let Some(config) = self.channels.config_index(channel) else {
            return;
        };
        for session in self.sessions.orphaned_for_config(config) {
            self.send_reactivation(session, channel);
        }
    }

    /// A channel dropped
    pub fn on_channel_lost(&mut self, channel: ChannelHandle) {
        if !self.channels.is_valid_channel(channel) {
            return;
        }
        if self.channels.is_client_channel(channel) {
            let config = self.channels.config_index(channel);
            let mut replacement = config.and_then(|c| {
                self.channels
                    .lookup_by_config(c)
                    .filter(|found| *found != channel)
            });
            if replacement.is_none() {
                replacement = config.and_then(|c| self.channels.open_channel(c));
            }
            let (orphaned, freed) =
                self.sessions
                    .cli_secure_channel_lost(channel, replacement, config);
            for handle in freed {
                self.handles.remove(handle);
            }
            if let Some(new_channel) =
                replacement.filter(|r| self.channels.is_valid_channel(*r))
            {
                for session in orphaned {
                    self.send_reactivation(session, new_channel);
                }
            }
        } else {
            for handle in self.sessions.srv_secure_channel_lost(channel) {
                self.handles.remove(handle);
            }
        }
        self.channels.channel_lost(channel);
    }

    /// A connection attempt timed out: equivalent to "the response never
    /// arrives" for every session waiting on that channel
    pub fn on_connection_timeout(&mut self, channel: ChannelHandle) {
        for session in self.sessions.sessions_on_channel(channel) {
            if self.sessions.state_or_closed(session).awaits_lifecycle_response() {
                debug!(session = %session, "lifecycle response timed out, closing");
                self.close_session_cleanup(session);
            }
        }
    }

    fn send_reactivation(&mut self, session: SessionId, new_channel: ChannelHandle) {
        let mut request = Message::alloc(MessageType::ActivateSessionRequest);
        let handle = self.handles.fresh(MessageType::ActivateSessionResponse);
        let (ret, token) = self.sessions.cli_sc_activate_req(
            session,
            handle,
            new_channel,
            &mut request,
            &self.channels,
        );
        if !ret.is_good() {
            self.handles.remove(handle);
            return;
        }
        request.set_request_handle(handle);
        if let Some(token) = token {
            request.set_session_token(token);
        }
        self.handles.bind_session(handle, session);
        let sent = self.channels.send_on_channel(new_channel, request);
        if !sent.is_good() {
            self.handles.remove(handle);
            self.close_session_cleanup(session);
        }
    }

    // ------------------------------------------------------------------
    // Application-facing operations (client side)
    // ------------------------------------------------------------------

    /// Create a session on the configuration, opening a channel when
    /// none is connected yet
    pub fn create_session(&mut self, config: ChannelConfigIdx) -> Option<SessionId> {
        let channel = match self.channels.lookup_by_config(config) {
            Some(ch) => Some(ch),
            None => self.channels.open_channel(config),
        };
        let channel = channel.filter(|ch| self.channels.is_valid_channel(*ch))?;

        let mut request = Message::alloc(MessageType::CreateSessionRequest);
        let handle = self.handles.fresh(MessageType::CreateSessionResponse);
        let session = self.sessions.cli_init_session();
        let ret =
            self.sessions
                .cli_create_req(session, channel, handle, &mut request, &self.channels);
        if !ret.is_good() {
            self.handles.remove(handle);
            self.close_session_cleanup(session);
            return None;
        }
        request.set_request_handle(handle);
        self.handles.bind_session(handle, session);
        let sent = self.channels.send_on_channel(channel, request);
        if !sent.is_good() {
            self.handles.remove(handle);
            self.close_session_cleanup(session);
            return None;
        }
        Some(session)
    }

    /// Activate a session with a user identity
    pub fn activate_session(&mut self, session: SessionId, user: UserIdentity) -> StatusCode {
        let mut request = Message::alloc(MessageType::ActivateSessionRequest);
        let handle = self.handles.fresh(MessageType::ActivateSessionResponse);
        let (ret, channel, token) =
            self.sessions
                .cli_user_activate_req(session, handle, user, &mut request, &self.channels);
        if !ret.is_good() {
            self.handles.remove(handle);
            return ret;
        }
        request.set_request_handle(handle);
        if let Some(token) = token {
            request.set_session_token(token);
        }
        self.handles.bind_session(handle, session);
        let channel = channel.expect("good activate always carries a channel");
        let sent = self.channels.send_on_channel(channel, request);
        if !sent.is_good() {
            self.handles.remove(handle);
            self.close_session_cleanup(session);
            return sent;
        }
        StatusCode::Good
    }

    /// Close a session
    pub fn close_session(&mut self, session: SessionId) -> StatusCode {
        let handle = self.handles.fresh(MessageType::CloseSessionResponse);
        let (ret, channel, token) = self.sessions.cli_close_req(session, handle, &self.channels);
        if !ret.is_good() {
            self.handles.remove(handle);
            return ret;
        }
        let mut request = Message::alloc(MessageType::CloseSessionRequest);
        request.set_request_handle(handle);
        if let Some(token) = token {
            request.set_session_token(token);
        }
        self.handles.bind_session(handle, session);
        let channel = channel.expect("good close always carries a channel");
        let sent = self.channels.send_on_channel(channel, request);
        if !sent.is_good() {
            self.handles.remove(handle);
            self.close_session_cleanup(session);
            return sent;
        }
        StatusCode::Good
    }

    /// Send a session-scoped service request
    pub fn send_service_request(&mut self, session: SessionId, mut message: Message) -> StatusCode {
        let msg_type = message.msg_type();
        let Some(resp_type) = msg_type
            .response_for()
            .filter(|_| msg_type.is_session_service_request())
        else {
            return StatusCode::BadInvalidArgument;
        };
        let handle = self.handles.fresh(resp_type);
        let (ret, token) = self.sessions.cli_new_session_service_req(session, handle);
        if !ret.is_good() {
            self.handles.remove(handle);
            return ret;
        }
        message.set_request_handle(handle);
        if let Some(token) = token {
            message.set_session_token(token);
        }
        self.handles.bind_session(handle, session);
        let channel = match self.sessions.get(session).and_then(|s| s.channel()) {
            Some(ch) => ch,
            None => {
                self.handles.remove(handle);
                return StatusCode::BadSecureChannelIdInvalid;
            }
        };
        let sent = self.channels.send_on_channel(channel, message);
        if !sent.is_good() {
            self.handles.remove(handle);
            self.close_session_cleanup(session);
            return sent;
        }
        StatusCode::Good
    }

    /// Close every live session and flush their handles
    pub fn close_all_active_connections(&mut self) {
        for session in self.sessions.live_sessions() {
            self.close_session_cleanup(session);
        }
    }
}
