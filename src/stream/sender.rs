//! Client-side frame sender
//!
//! Drains a [`ChunkReceiver`] into the WebSocket as binary messages and
//! finishes with a single `{"event":"end"}` text message.

use futures::{Sink, SinkExt};
use tokio_tungstenite::tungstenite::Message;

use super::ChunkReceiver;
use crate::session::ClientEvent;
use crate::{Error, Result};

/// Writes captured frames to the transport
pub struct SessionSender<S> {
    sink: S,
    sent: usize,
}

impl<S, E> SessionSender<S>
where
    S: Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    pub const fn new(sink: S) -> Self {
        Self { sink, sent: 0 }
    }

    /// Send every frame until the queue closes, then the end event
    ///
    /// Returns the number of frames sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` on the first failed write; nothing further is sent
    pub async fn run(&mut self, mut receiver: ChunkReceiver) -> Result<usize> {
        while let Some(frame) = receiver.recv().await {
            if frame.is_empty() {
                continue;
            }
            self.sink
                .send(Message::Binary(frame.into_bytes().into()))
                .await
                .map_err(|e| Error::Transport(format!("failed to send frame: {e}")))?;
            self.sent += 1;
        }

        let end = serde_json::to_string(&ClientEvent::End)?;
        self.sink
            .send(Message::text(end))
            .await
            .map_err(|e| Error::Transport(format!("failed to send end event: {e}")))?;

        tracing::debug!(frames = self.sent, "utterance sent");
        Ok(self.sent)
    }

    #[must_use]
    pub const fn sent(&self) -> usize {
        self.sent
    }

    /// Recover the sink, e.g. to close the socket
    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::channel::mpsc;

    use super::*;
    use crate::stream::chunk_queue;
    use crate::voice::AudioFrame;

    #[tokio::test]
    async fn frames_then_single_end() {
        let (queue, receiver) = chunk_queue();
        for i in 0..3 {
            queue.push(AudioFrame::from_samples(&[i; 2]));
        }
        queue.push(AudioFrame::from_samples(&[]));
        queue.close();

        let (tx, rx) = mpsc::unbounded::<Message>();
        let mut sender = SessionSender::new(tx);
        assert_eq!(sender.run(receiver).await.unwrap(), 3);
        drop(sender);

        let sent: Vec<Message> = rx.collect().await;
        assert_eq!(sent.len(), 4);
        assert!(sent[..3].iter().all(Message::is_binary));
        assert_eq!(sent[3], Message::text(r#"{"event":"end"}"#));
    }

    #[tokio::test]
    async fn write_failure_stops_the_loop() {
        let (queue, receiver) = chunk_queue();
        queue.push(AudioFrame::from_samples(&[1, 2]));
        queue.close();

        let (tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        let mut sender = SessionSender::new(tx);
        let err = sender.run(receiver).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(sender.sent(), 0);
    }
}
