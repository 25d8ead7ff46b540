//! Device-side client for the streaming voice session

pub mod http;

use std::future::Future;

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::ClientConfig;
use crate::session::protocol::decode_audio;
use crate::session::{ServerEvent, UNAUTHORIZED_CLOSE_CODE};
use crate::stream::{ChunkReceiver, SessionSender, chunk_queue};
use crate::voice::{AudioCaptureSource, PlaybackSink};
use crate::{Error, Result};

/// Outcome of one streamed utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub event: ServerEvent,
    pub frames_sent: usize,
}

/// Decoded reply ready for playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpokenReply {
    pub transcript: String,
    pub response_text: String,
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

impl Exchange {
    /// Decode the result event
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` for an undecodable payload and
    /// `Error::Transport` carrying the server message for an error event
    pub fn into_reply(self) -> Result<SpokenReply> {
        match self.event {
            ServerEvent::Result {
                transcript,
                response_text,
                audio_format,
                sample_rate,
                audio_base64,
            } => {
                if audio_format != crate::voice::AUDIO_ENCODING {
                    return Err(Error::Protocol(format!(
                        "unsupported audio format {audio_format}"
                    )));
                }
                Ok(SpokenReply {
                    transcript,
                    response_text,
                    pcm: decode_audio(&audio_base64)?,
                    sample_rate,
                })
            }
            ServerEvent::Error { reason, message } => {
                Err(Error::Transport(format!("{message} ({reason})")))
            }
        }
    }
}

/// Connects to `/ws/voice` and runs one utterance per call
pub struct VoiceClient {
    ws_url: String,
    token: SecretString,
}

impl VoiceClient {
    #[must_use]
    pub fn new(ws_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            ws_url: ws_url.into(),
            token,
        }
    }

    /// Build from client configuration
    ///
    /// # Errors
    ///
    /// Returns error if `BACKEND_WS_URL` is not configured
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(
            config.ws_url()?,
            SecretString::from(config.api_token.expose_secret().to_owned()),
        ))
    }

    /// Endpoint with the url-encoded token appended
    #[must_use]
    pub fn session_url(&self) -> String {
        let sep = if self.ws_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{sep}token={}",
            self.ws_url,
            urlencoding::encode(self.token.expose_secret())
        )
    }

    /// Stream every frame from `receiver` and wait for the terminal event
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if the server rejects the token and
    /// `Error::Transport` if the connection fails before a terminal event
    pub async fn exchange(&self, receiver: ChunkReceiver) -> Result<Exchange> {
        let (socket, _) = tokio_tungstenite::connect_async(self.session_url())
            .await
            .map_err(|e| Error::Transport(format!("failed to connect to {}: {e}", self.ws_url)))?;
        tracing::debug!(url = %self.ws_url, "connected");

        let (sink, mut stream) = socket.split();
        let mut sender = SessionSender::new(sink);

        let event = {
            let send = sender.run(receiver);
            tokio::pin!(send);
            let mut sending = true;

            loop {
                tokio::select! {
                    result = &mut send, if sending => {
                        sending = false;
                        if let Err(e) = result {
                            tracing::warn!(error = %e, "sending stopped early");
                        }
                    }
                    message = stream.next() => {
                        if let Some(event) = read_event(message)? {
                            break event;
                        }
                    }
                }
            }
        };

        let frames_sent = sender.sent();
        let mut sink = sender.into_inner();
        // The server closes after the terminal event; our half may already be gone
        let _ = sink.close().await;

        Ok(Exchange { event, frames_sent })
    }

    /// Capture until `stop` resolves, then stream and await the reply
    ///
    /// Capture starts immediately; frames are buffered until the connection opens.
    ///
    /// # Errors
    ///
    /// Returns error if capture fails to start or the exchange fails
    pub async fn talk_once<C, F>(&self, capture: &mut C, stop: F) -> Result<Exchange>
    where
        C: AudioCaptureSource + ?Sized,
        F: Future<Output = ()>,
    {
        let (queue, receiver) = chunk_queue();
        let exchange = self.exchange(receiver);
        tokio::pin!(exchange);

        capture.start(queue)?;
        tokio::select! {
            () = stop => capture.stop(),
            result = &mut exchange => {
                capture.stop();
                return result;
            }
        }

        exchange.await
    }
}

/// Interpret one inbound message; `None` means keep reading
fn read_event(
    message: Option<std::result::Result<Message, tungstenite::Error>>,
) -> Result<Option<ServerEvent>> {
    match message {
        Some(Ok(Message::Text(text))) => serde_json::from_str(text.as_str())
            .map(Some)
            .map_err(|e| Error::Protocol(format!("unexpected server message: {e}"))),
        Some(Ok(Message::Close(Some(frame))))
            if u16::from(frame.code) == UNAUTHORIZED_CLOSE_CODE =>
        {
            Err(Error::Auth("server rejected the device token".to_string()))
        }
        Some(Ok(Message::Close(_))) | None => Err(Error::Transport(
            "connection closed before a result arrived".to_string(),
        )),
        Some(Ok(_)) => Ok(None),
        Some(Err(e)) => Err(Error::Transport(format!("read failed: {e}"))),
    }
}

/// Log and play a finished exchange
///
/// # Errors
///
/// Returns error if the exchange ended in an error event or playback fails
pub fn play_reply(exchange: Exchange, sink: &mut dyn PlaybackSink) -> Result<SpokenReply> {
    let reply = exchange.into_reply()?;
    tracing::info!(transcript = %reply.transcript, reply = %reply.response_text, "reply received");
    sink.play(&reply.pcm, reply.sample_rate)?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use tungstenite::protocol::CloseFrame;
    use tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    #[test]
    fn token_is_url_encoded() {
        let client = VoiceClient::new(
            "ws://pi.local:8080/ws/voice",
            SecretString::from("a b&c".to_string()),
        );
        assert_eq!(
            client.session_url(),
            "ws://pi.local:8080/ws/voice?token=a%20b%26c"
        );

        let client = VoiceClient::new("ws://h/ws/voice?x=1", SecretString::from("t".to_string()));
        assert_eq!(client.session_url(), "ws://h/ws/voice?x=1&token=t");
    }

    #[test]
    fn unauthorized_close_is_auth_error() {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::from(4401),
            reason: tungstenite::Utf8Bytes::from_static("unauthorized"),
        }));
        assert!(matches!(read_event(Some(Ok(close))), Err(Error::Auth(_))));
        assert!(matches!(read_event(None), Err(Error::Transport(_))));
        assert!(matches!(
            read_event(Some(Ok(Message::Ping(Vec::new().into())))),
            Ok(None)
        ));
    }

    #[test]
    fn result_event_decodes_to_reply() {
        let exchange = Exchange {
            event: ServerEvent::result("こんにちは", "やあ", &[1, 0, 2, 0], 16000),
            frames_sent: 40,
        };
        let reply = exchange.into_reply().unwrap();
        assert_eq!(reply.pcm, vec![1, 0, 2, 0]);
        assert_eq!(reply.sample_rate, 16000);
    }

    #[test]
    fn error_event_surfaces_message() {
        let exchange = Exchange {
            event: ServerEvent::Error {
                reason: "recognition_empty".into(),
                message: "音声を認識できませんでした".into(),
            },
            frames_sent: 0,
        };
        let err = exchange.into_reply().unwrap_err();
        assert!(err.to_string().contains("音声を認識できませんでした"));
    }
}
