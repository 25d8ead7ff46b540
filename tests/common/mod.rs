//! Shared test utilities

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::net::TcpListener;

use voice_chatter::persona::Prompt;
use voice_chatter::services::{
    FrameSource, Generator, RecognitionConfig, RecognitionResult, Recognizer, ResultStream,
    Synthesizer, VoiceParams,
};
use voice_chatter::session::GenerationFailurePolicy;
use voice_chatter::voice::samples_to_pcm;
use voice_chatter::{ApiServer, ApiServerBuilder, Error, Services};

/// Device token accepted by test servers
pub const TOKEN: &str = "test-device-token";

/// Call counters shared with the fake services
#[derive(Debug, Clone, Default)]
pub struct Calls {
    /// Frames the recognizer consumed, set when its stream finishes
    pub frames: Arc<AtomicUsize>,
    pub recognitions: Arc<AtomicUsize>,
    pub generations: Arc<AtomicUsize>,
    pub syntheses: Arc<AtomicUsize>,
}

impl Calls {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn recognitions(&self) -> usize {
        self.recognitions.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn syntheses(&self) -> usize {
        self.syntheses.load(Ordering::SeqCst)
    }
}

/// Hears `transcript` whenever at least one frame arrives
pub struct FakeRecognizer {
    transcript: String,
    calls: Calls,
}

impl Recognizer for FakeRecognizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn streaming_recognize<'a>(
        &'a self,
        _config: RecognitionConfig,
        frames: FrameSource<'a>,
    ) -> voice_chatter::Result<ResultStream<'a>> {
        self.calls.recognitions.fetch_add(1, Ordering::SeqCst);
        let interim = std::iter::once(Ok::<_, Error>(RecognitionResult::interim("…")));
        let last = std::iter::once_with(move || {
            let count = frames.count();
            self.calls.frames.store(count, Ordering::SeqCst);
            let heard = if count == 0 { "" } else { self.transcript.as_str() };
            Ok::<_, Error>(RecognitionResult::final_result(heard))
        });
        Ok(Box::new(interim.chain(last)))
    }
}

/// Returns `reply` after `delay`, or fails when it is `None`
pub struct FakeGenerator {
    reply: Option<String>,
    delay: Duration,
    calls: Calls,
}

#[async_trait]
impl Generator for FakeGenerator {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate(&self, _prompt: &Prompt) -> voice_chatter::Result<String> {
        self.calls.generations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.reply
            .clone()
            .ok_or_else(|| Error::Llm("model unavailable".to_string()))
    }
}

/// Returns [`reply_pcm`] for any text
pub struct FakeSynthesizer {
    calls: Calls,
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn synthesize(&self, _text: &str, _voice: &VoiceParams) -> voice_chatter::Result<Vec<u8>> {
        self.calls.syntheses.fetch_add(1, Ordering::SeqCst);
        Ok(reply_pcm())
    }
}

/// Audio the fake synthesizer speaks
pub fn reply_pcm() -> Vec<u8> {
    samples_to_pcm(&[100, -100, 200, -200, 300, -300, 400, -400])
}

/// Fake service set and its counters
pub fn fake_services(transcript: &str, reply: Option<&str>) -> (Services, Calls) {
    slow_services(transcript, reply, Duration::ZERO)
}

/// Like [`fake_services`], with a generator that takes `delay` to answer
pub fn slow_services(transcript: &str, reply: Option<&str>, delay: Duration) -> (Services, Calls) {
    let calls = Calls::default();
    let services = Services {
        recognizer: Arc::new(FakeRecognizer {
            transcript: transcript.to_string(),
            calls: calls.clone(),
        }),
        generator: Arc::new(FakeGenerator {
            reply: reply.map(ToString::to_string),
            delay,
            calls: calls.clone(),
        }),
        synthesizer: Arc::new(FakeSynthesizer {
            calls: calls.clone(),
        }),
    };
    (services, calls)
}

/// Build a server around `services` with a short idle timeout
pub fn build_server(services: Services, policy: GenerationFailurePolicy) -> ApiServer {
    ApiServerBuilder::new(SecretString::from(TOKEN.to_string()), services)
        .generation_failure_policy(policy)
        .stream_idle_timeout(Duration::from_secs(2))
        .build()
}

/// Serve on an ephemeral local port and return its address
pub async fn start_server(services: Services, policy: GenerationFailurePolicy) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no address");
    let server = build_server(services, policy);
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

/// Streaming endpoint for a test server
pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws/voice")
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
