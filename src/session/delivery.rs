//! Terminal message delivery
//!
//! [`ResultDelivery`] owns the outbound half of the socket and is consumed by
//! the first send, so a session can emit at most one terminal event.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, close_code};
use futures::{Sink, SinkExt};

use super::ServerEvent;
use crate::{Error, Result};

/// One-shot writer for the session's terminal event
pub struct ResultDelivery<S> {
    sink: S,
}

impl<S, E> ResultDelivery<S>
where
    S: Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    pub const fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Send `event` as a JSON text frame, then close normally
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the socket rejects either frame
    pub async fn deliver(mut self, event: &ServerEvent) -> Result<()> {
        let payload = event.to_json()?;
        let bytes = payload.len();

        self.sink
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| Error::Transport(format!("failed to send terminal event: {e}")))?;

        tracing::debug!(bytes, "terminal event sent");

        self.close(close_code::NORMAL, Utf8Bytes::from_static("done"))
            .await
    }

    /// Close without a terminal event (e.g. rejected token)
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the close frame cannot be sent
    pub async fn reject(mut self, code: u16, reason: &'static str) -> Result<()> {
        self.close(code, Utf8Bytes::from_static(reason)).await
    }

    async fn close(&mut self, code: u16, reason: Utf8Bytes) -> Result<()> {
        self.sink
            .send(Message::Close(Some(CloseFrame { code, reason })))
            .await
            .map_err(|e| Error::Transport(format!("failed to send close frame: {e}")))?;
        // The peer may already be gone; the close frame is best effort from here
        let _ = self.sink.close().await;
        Ok(())
    }
}
