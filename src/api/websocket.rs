//! Streaming voice session over WebSocket
//!
//! One connection carries one utterance: binary PCM frames, then
//! `{"event":"end"}`, answered by exactly one terminal event and a close.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::StreamExt;
use futures::stream::SplitStream;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiState;
use crate::session::protocol::parse_client_event;
use crate::session::{
    ClientEvent, Failure, ResultDelivery, ServerEvent, Session, SessionState,
    UNAUTHORIZED_CLOSE_CODE,
};
use crate::stream::{ChunkQueue, RecognitionConsumer, chunk_queue};
use crate::voice::AudioFrame;

/// Query parameters for the WebSocket connection
#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// How the inbound stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// Client sent the end event
    EndOfUtterance,
    /// Close frame, read error or dropped connection
    Disconnected,
    /// Nothing arrived within the idle timeout
    IdleTimeout,
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws/voice", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

/// Drive one session from connect to close
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, token: Option<String>) {
    let mut session = Session::new();
    let session_id = session.id();
    let (sink, stream) = socket.split();
    let delivery = ResultDelivery::new(sink);

    transition(&mut session, SessionState::Authenticating);
    if !state.token_matches(token.as_deref()) {
        session.fail(Failure::Unauthorized("device token mismatch".to_string()));
        if let Err(e) = delivery
            .reject(UNAUTHORIZED_CLOSE_CODE, "unauthorized")
            .await
        {
            tracing::debug!(session_id = %session_id, error = %e, "reject close failed");
        }
        session.close();
        return;
    }

    transition(&mut session, SessionState::Streaming);
    tracing::info!(session_id = %session_id, "voice session started");

    let outcome = stream_and_respond(&state, &mut session, stream).await;

    match outcome {
        Ok(event) => {
            if let Err(e) = session.set_result(event.clone()) {
                tracing::error!(session_id = %session_id, error = %e, "terminal event already set");
            }
            match delivery.deliver(&event).await {
                Ok(()) => {
                    transition(&mut session, SessionState::Closed);
                    tracing::info!(session_id = %session_id, "session closed");
                }
                Err(e) => {
                    session.fail(Failure::Transport(e.to_string()));
                    session.close();
                }
            }
        }
        Err(failure) => {
            let event = session.fail(failure);
            if let Err(e) = delivery.deliver(&event).await {
                tracing::debug!(session_id = %session_id, error = %e, "error event not delivered");
            }
            session.close();
        }
    }
}

/// Streaming, recognition, generation and synthesis for one session
///
/// After the end event the inbound half is still watched; a close at any
/// later point fails the session before its next step runs.
async fn stream_and_respond(
    state: &ApiState,
    session: &mut Session,
    stream: SplitStream<WebSocket>,
) -> Result<ServerEvent, Failure> {
    let session_id = session.id();
    let (queue, receiver) = chunk_queue();

    let consumer = RecognitionConsumer::new(
        Arc::clone(&state.services.recognizer),
        state.recognition.clone(),
    );
    let recognition = tokio::spawn(consumer.run(receiver));
    let receive = tokio::spawn(receive_frames(
        stream,
        queue,
        state.stream_idle_timeout,
        session_id,
    ));

    let (end, stream) = receive.await.map_err(|e| {
        tracing::error!(session_id = %session_id, error = %e, "receive task failed");
        Failure::Transport(format!("receive task failed: {e}"))
    })?;

    transition(session, SessionState::Recognizing);
    let recognized = async {
        recognition
            .await
            .map_err(|e| Failure::RecognitionFailed(format!("recognition task failed: {e}")))
            .and_then(|result| result)
    };

    match end {
        StreamEnd::EndOfUtterance => {}
        StreamEnd::Disconnected => {
            // queue is closed, so the worker finishes promptly
            let _ = recognized.await;
            return Err(Failure::Transport(
                "client disconnected before end of utterance".to_string(),
            ));
        }
        StreamEnd::IdleTimeout => {
            let _ = recognized.await;
            return Err(Failure::Transport(format!(
                "no audio for {}s",
                state.stream_idle_timeout.as_secs()
            )));
        }
    }

    let closed = watch_close(stream, session_id);
    tokio::pin!(closed);

    let transcript = unless_closed(closed.as_mut(), recognized).await?.transcript;
    session.set_transcript(transcript.clone());

    transition(session, SessionState::Generating);
    let reply = unless_closed(closed.as_mut(), state.pipeline.generate(&transcript)).await?;

    transition(session, SessionState::Synthesizing);
    let audio = unless_closed(closed.as_mut(), state.pipeline.synthesize(&reply.text)).await?;

    // a close that raced the last step still wins
    unless_closed(closed.as_mut(), std::future::ready(Ok(()))).await?;

    transition(session, SessionState::Delivering);
    tracing::info!(
        session_id = %session_id,
        transcript = %transcript,
        apologized = reply.apologized,
        bytes = audio.len(),
        "reply ready"
    );

    Ok(ServerEvent::result(
        &transcript,
        &reply.text,
        &audio,
        state.pipeline.sample_rate(),
    ))
}

/// Run `step` unless the client goes away first
async fn unless_closed<C, F, T>(closed: Pin<&mut C>, step: F) -> Result<T, Failure>
where
    C: Future<Output = ()>,
    F: Future<Output = Result<T, Failure>>,
{
    tokio::select! {
        biased;
        () = closed => Err(Failure::Transport(
            "client disconnected before the reply was delivered".to_string(),
        )),
        result = step => result,
    }
}

/// Resolve once the client closes or drops the connection
async fn watch_close(mut stream: SplitStream<WebSocket>, session_id: Uuid) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Close(_)) | Err(_)) | None => {
                tracing::debug!(session_id = %session_id, "client went away after end of utterance");
                return;
            }
            Some(Ok(_)) => {
                tracing::trace!(session_id = %session_id, "ignoring message after end of utterance");
            }
        }
    }
}

/// Drain inbound messages into the queue until the utterance ends
///
/// The queue is closed exactly once, whichever way the stream ends. The
/// inbound half is handed back so the session can keep watching it.
async fn receive_frames(
    mut stream: SplitStream<WebSocket>,
    queue: ChunkQueue,
    idle_timeout: Duration,
    session_id: Uuid,
) -> (StreamEnd, SplitStream<WebSocket>) {
    let end = loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            break StreamEnd::IdleTimeout;
        };

        match next {
            Some(Ok(Message::Binary(bytes))) => {
                if bytes.is_empty() {
                    continue;
                }
                match AudioFrame::from_pcm(bytes.to_vec()) {
                    Ok(frame) => {
                        if !queue.push(frame) {
                            tracing::trace!(session_id = %session_id, "recognizer no longer consuming");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "dropping malformed frame");
                    }
                }
            }
            Some(Ok(Message::Text(text))) => match parse_client_event(text.as_str()) {
                Ok(ClientEvent::End) => break StreamEnd::EndOfUtterance,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "ignoring control message");
                }
            },
            Some(Ok(Message::Close(_))) | None => break StreamEnd::Disconnected,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "websocket read failed");
                break StreamEnd::Disconnected;
            }
        }
    };

    queue.close();
    tracing::debug!(
        session_id = %session_id,
        frames = queue.enqueued(),
        end = ?end,
        "inbound stream finished"
    );
    (end, stream)
}

fn transition(session: &mut Session, next: SessionState) {
    if let Err(e) = session.advance(next) {
        tracing::error!(session_id = %session.id(), error = %e, "session state violation");
    }
}
