//! Opaque message envelope and typed header accessors
//!
//! The wire codec lives outside the core; what travels through the
//! dispatcher is this envelope — a message type, the correlation and
//! session header fields, a service status, and payload bytes the core
//! never interprets. Accessors mirror the two header fields attached to
//! every outgoing message: the request handle (echoed by the server) and
//! the session token (required on session-scoped requests).

use crate::error::StatusCode;
use crate::types::{Nonce, RequestHandle, SessionToken, UserIdentity};
use serde::{Deserialize, Serialize};

/// Message kinds the dispatcher routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Transport HELLO
    Hello,
    /// Transport ACK
    Ack,
    /// OpenSecureChannel request
    OpenChannelRequest,
    /// OpenSecureChannel response
    OpenChannelResponse,
    /// CloseSecureChannel request
    CloseChannelRequest,
    /// CloseSecureChannel response
    CloseChannelResponse,
    /// Discovery-class request outside any session
    PublicServiceRequest,
    /// Discovery-class response outside any session
    PublicServiceResponse,
    /// CreateSession request
    CreateSessionRequest,
    /// CreateSession response
    CreateSessionResponse,
    /// ActivateSession request
    ActivateSessionRequest,
    /// ActivateSession response
    ActivateSessionResponse,
    /// CloseSession request
    CloseSessionRequest,
    /// CloseSession response
    CloseSessionResponse,
    /// Read service request
    ReadRequest,
    /// Read service response
    ReadResponse,
    /// Write service request
    WriteRequest,
    /// Write service response
    WriteResponse,
    /// Browse service request
    BrowseRequest,
    /// Browse service response
    BrowseResponse,
}

impl MessageType {
    /// Channel-level messages are delegated to the channel collaborator
    pub fn is_channel_level(self) -> bool {
        matches!(
            self,
            MessageType::Hello
                | MessageType::Ack
                | MessageType::OpenChannelRequest
                | MessageType::OpenChannelResponse
                | MessageType::CloseChannelRequest
                | MessageType::CloseChannelResponse
                | MessageType::PublicServiceRequest
                | MessageType::PublicServiceResponse
        )
    }

    /// True for request kinds
    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::Hello
                | MessageType::OpenChannelRequest
                | MessageType::CloseChannelRequest
                | MessageType::PublicServiceRequest
                | MessageType::CreateSessionRequest
                | MessageType::ActivateSessionRequest
                | MessageType::CloseSessionRequest
                | MessageType::ReadRequest
                | MessageType::WriteRequest
                | MessageType::BrowseRequest
        )
    }

    /// The response kind matching a request kind
    pub fn response_for(self) -> Option<MessageType> {
        match self {
            MessageType::CreateSessionRequest => Some(MessageType::CreateSessionResponse),
            MessageType::ActivateSessionRequest => Some(MessageType::ActivateSessionResponse),
            MessageType::CloseSessionRequest => Some(MessageType::CloseSessionResponse),
            MessageType::ReadRequest => Some(MessageType::ReadResponse),
            MessageType::WriteRequest => Some(MessageType::WriteResponse),
            MessageType::BrowseRequest => Some(MessageType::BrowseResponse),
            MessageType::OpenChannelRequest => Some(MessageType::OpenChannelResponse),
            MessageType::CloseChannelRequest => Some(MessageType::CloseChannelResponse),
            MessageType::PublicServiceRequest => Some(MessageType::PublicServiceResponse),
            _ => None,
        }
    }

    /// Session-scoped service requests (read/write/browse)
    pub fn is_session_service_request(self) -> bool {
        matches!(
            self,
            MessageType::ReadRequest | MessageType::WriteRequest | MessageType::BrowseRequest
        )
    }

    /// Session-scoped service responses
    pub fn is_session_service_response(self) -> bool {
        matches!(
            self,
            MessageType::ReadResponse | MessageType::WriteResponse | MessageType::BrowseResponse
        )
    }
}

/// A decoded message as the core sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    msg_type: MessageType,
    request_handle: Option<RequestHandle>,
    session_token: Option<SessionToken>,
    status: StatusCode,
    user: Option<UserIdentity>,
    client_nonce: Option<Nonce>,
    server_nonce: Option<Nonce>,
    payload: Vec<u8>,
}

impl Message {
    /// Allocate an empty message of the given kind
    pub fn alloc(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            request_handle: None,
            session_token: None,
            status: StatusCode::Good,
            user: None,
            client_nonce: None,
            server_nonce: None,
            payload: Vec::new(),
        }
    }

    /// Message kind
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// Request handle header field
    pub fn request_handle(&self) -> Option<RequestHandle> {
        self.request_handle
    }

    /// Attach the request handle header field
    pub fn set_request_handle(&mut self, handle: RequestHandle) {
        self.request_handle = Some(handle);
    }

    /// Session token header field (or CreateSession response token)
    pub fn session_token(&self) -> Option<SessionToken> {
        self.session_token
    }

    /// Attach the session token header field
    pub fn set_session_token(&mut self, token: SessionToken) {
        self.session_token = Some(token);
    }

    /// Service status of a response header
    pub fn service_status(&self) -> StatusCode {
        self.status
    }

    /// Write the response header service status
    pub fn set_service_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// User identity carried by an activate request
    pub fn activation_user(&self) -> Option<&UserIdentity> {
        self.user.as_ref()
    }

    /// Write the user identity of an activate request
    pub fn set_activation_user(&mut self, user: UserIdentity) {
        self.user = Some(user);
    }

    /// Client nonce of a session-creation exchange
    pub fn client_nonce(&self) -> Option<&Nonce> {
        self.client_nonce.as_ref()
    }

    /// Write the client nonce
    pub fn set_client_nonce(&mut self, nonce: Nonce) {
        self.client_nonce = Some(nonce);
    }

    /// Server nonce of a session-creation exchange
    pub fn server_nonce(&self) -> Option<&Nonce> {
        self.server_nonce.as_ref()
    }

    /// Write the server nonce
    pub fn set_server_nonce(&mut self, nonce: Nonce) {
        self.server_nonce = Some(nonce);
    }

    /// Opaque payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload bytes
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_response_pairing() {
        assert_eq!(
            MessageType::CreateSessionRequest.response_for(),
            Some(MessageType::CreateSessionResponse)
        );
        assert_eq!(
            MessageType::ReadRequest.response_for(),
            Some(MessageType::ReadResponse)
        );
        assert_eq!(MessageType::ReadResponse.response_for(), None);
    }

    #[test]
    fn test_channel_level_classification() {
        assert!(MessageType::Hello.is_channel_level());
        assert!(MessageType::OpenChannelResponse.is_channel_level());
        assert!(!MessageType::CreateSessionRequest.is_channel_level());
        assert!(!MessageType::ReadResponse.is_channel_level());
    }

    #[test]
    fn test_request_classification() {
        assert!(MessageType::ReadRequest.is_request());
        assert!(!MessageType::ReadResponse.is_request());
        assert!(MessageType::ReadRequest.is_session_service_request());
        assert!(!MessageType::CreateSessionRequest.is_session_service_request());
    }

    #[test]
    fn test_header_accessors() {
        let mut msg = Message::alloc(MessageType::ReadRequest);
        assert_eq!(msg.request_handle(), None);
        msg.set_request_handle(RequestHandle(42));
        msg.set_session_token(SessionToken(7));
        msg.set_service_status(StatusCode::BadSessionClosed);
        assert_eq!(msg.request_handle(), Some(RequestHandle(42)));
        assert_eq!(msg.session_token(), Some(SessionToken(7)));
        assert_eq!(msg.service_status(), StatusCode::BadSessionClosed);
    }
}
