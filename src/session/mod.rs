//! Per-connection session lifecycle
//!
//! A [`Session`] is created when a device connects and dropped when the
//! transport closes. It owns its state, the transcript and the single
//! terminal result.

mod delivery;
mod pipeline;
pub mod protocol;

use std::fmt;

use uuid::Uuid;

use crate::{Error, Result};

pub use delivery::ResultDelivery;
pub use pipeline::{GenerationFailurePolicy, Reply, ReplyText, ResponsePipeline};
pub use protocol::{ClientEvent, ServerEvent, UNAUTHORIZED_CLOSE_CODE};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Streaming,
    Recognizing,
    Generating,
    Synthesizing,
    Delivering,
    Error,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`
    #[must_use]
    pub const fn can_advance(self, next: Self) -> bool {
        use SessionState::{
            Authenticating, Closed, Connecting, Delivering, Error, Generating, Recognizing,
            Streaming, Synthesizing,
        };

        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Streaming)
                | (Streaming, Recognizing)
                | (Recognizing, Generating)
                | (Generating, Synthesizing)
                | (Synthesizing, Delivering)
                | (Delivering, Closed)
                | (Error, Closed)
                | (
                    Connecting
                        | Authenticating
                        | Streaming
                        | Recognizing
                        | Generating
                        | Synthesizing
                        | Delivering,
                    Error
                )
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Streaming => "streaming",
            Self::Recognizing => "recognizing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Delivering => "delivering",
            Self::Error => "error",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a session ended without a result
///
/// The detail string is for logs only; the wire carries [`Failure::reason`]
/// and [`Failure::user_message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no speech recognized")]
    RecognitionEmpty,

    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("transport failed: {0}")]
    Transport(String),
}

impl Failure {
    /// Stable machine-readable reason
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::RecognitionEmpty => "recognition_empty",
            Self::RecognitionFailed(_) => "recognition_failed",
            Self::GenerationFailed(_) => "generation_failed",
            Self::SynthesisFailed(_) => "synthesis_failed",
            Self::Transport(_) => "transport",
        }
    }

    /// Fixed message shown to the user
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "認証に失敗しました",
            Self::RecognitionEmpty => "音声を認識できませんでした",
            Self::RecognitionFailed(_) => "音声認識でエラーが発生しました",
            Self::GenerationFailed(_) => "応答を作成できませんでした",
            Self::SynthesisFailed(_) => "音声を合成できませんでした",
            Self::Transport(_) => "通信が切断されました",
        }
    }

    /// Terminal event announcing this failure
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            reason: self.reason().to_string(),
            message: self.user_message().to_string(),
        }
    }
}

/// One device conversation, from connect to close
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    state: SessionState,
    transcript: Option<String>,
    result: Option<ServerEvent>,
    failure: Option<Failure>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session_id = %id, "session created");
        Self {
            id,
            state: SessionState::Connecting,
            transcript: None,
            result: None,
            failure: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    /// The terminal event, once decided
    #[must_use]
    pub const fn result(&self) -> Option<&ServerEvent> {
        self.result.as_ref()
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if `next` is not a legal successor
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_advance(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "session transition");
        self.state = next;
        Ok(())
    }

    /// Record the recognized utterance
    pub fn set_transcript(&mut self, transcript: String) {
        self.transcript = Some(transcript);
    }

    /// Record the terminal event
    ///
    /// # Errors
    ///
    /// Returns error if a terminal event was already recorded
    pub fn set_result(&mut self, event: ServerEvent) -> Result<()> {
        if self.result.is_some() {
            return Err(Error::Protocol(
                "session already has a terminal event".to_string(),
            ));
        }
        self.result = Some(event);
        Ok(())
    }

    /// Enter `Error`, returning the terminal event to send
    ///
    /// Keeps the first failure if called twice.
    pub fn fail(&mut self, failure: Failure) -> ServerEvent {
        tracing::warn!(
            session_id = %self.id,
            state = %self.state,
            reason = failure.reason(),
            detail = %failure,
            "session failed"
        );
        if self.state.can_advance(SessionState::Error) {
            self.state = SessionState::Error;
        }
        let event = failure.to_event();
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        if self.result.is_none() {
            self.result = Some(event.clone());
        }
        event
    }

    /// Enter `Closed` from whatever state the session is in
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        // a live session closes through Error
        if !self.state.can_advance(SessionState::Closed) {
            let _ = self.advance(SessionState::Error);
        }
        if let Err(e) = self.advance(SessionState::Closed) {
            tracing::error!(session_id = %self.id, error = %e, "session state violation");
            self.state = SessionState::Closed;
        }
        tracing::info!(
            session_id = %self.id,
            outcome = self.failure.as_ref().map_or("result", Failure::reason),
            "session closed"
        );
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
