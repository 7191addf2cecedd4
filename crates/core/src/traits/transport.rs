//! Transport interface

use async_trait::async_trait;
use bytes::Bytes;

use crate::protocol::ServerMessage;
use crate::TransportError;

/// One message on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// JSON control signal
    Text(String),
    /// One encoded audio frame
    Audio(Bytes),
}

impl OutboundMessage {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

/// Ordered message transport to one client
///
/// Message order on the wire equals call order. Failures are reported
/// to the caller of `send`; the transport never retries on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a single message, completing once it has been handed to the connection
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Close the connection
    async fn close(&self) -> Result<(), TransportError>;

    /// Serialize and send a control signal
    async fn send_signal(&self, message: &ServerMessage) -> Result<(), TransportError> {
        let json = message.to_json()?;
        self.send(OutboundMessage::Text(json)).await
    }
}
