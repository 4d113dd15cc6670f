use axum::extract::ws::Message;
use rendezvous_protocol::DecodeError;
use std::{fmt, time::Duration};
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur in the lifetime of a signaling server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listen address could not be bound.
    #[error("Unable to bind listener")]
    Bind(#[source] std::io::Error),

    /// The HTTP server stopped with an error.
    #[error("Server error")]
    Serve(#[source] std::io::Error),
}

/// An error in server logic.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Unknown recipient peer")]
    UnknownPeer,
    #[error("Undeliverable message")]
    Undeliverable(#[from] SendError<Result<Message, axum::Error>>),
    #[error("Invalid peer or room id")]
    InvalidIds,
}

/// Why a peer is being torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    InvalidFormat,
    InvalidIds,
    SpoofedSender,
    UnknownType(String),
    SocketDisconnected,
    Inactive(Duration),
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::InvalidFormat => write!(f, "invalid message format"),
            DisconnectReason::InvalidIds => write!(f, "invalid ids"),
            DisconnectReason::SpoofedSender => write!(f, "spoofed sender"),
            DisconnectReason::UnknownType(kind) => write!(f, "unknown message type {kind}"),
            DisconnectReason::SocketDisconnected => write!(f, "socket disconnected"),
            DisconnectReason::Inactive(window) => write!(f, "no ping for {window:?}"),
            DisconnectReason::Shutdown => write!(f, "server shutting down"),
        }
    }
}

impl From<DecodeError> for DisconnectReason {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::Json(_) | DecodeError::NotAnObject | DecodeError::FieldType(_) => {
                DisconnectReason::InvalidFormat
            }
            DecodeError::UnknownType(kind) => DisconnectReason::UnknownType(kind),
        }
    }
}

impl From<SignalingError> for DisconnectReason {
    fn from(error: SignalingError) -> Self {
        match error {
            SignalingError::InvalidIds => DisconnectReason::InvalidIds,
            SignalingError::UnknownPeer | SignalingError::Undeliverable(_) => {
                DisconnectReason::SocketDisconnected
            }
        }
    }
}
