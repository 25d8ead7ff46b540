//! Producer/consumer plumbing between capture, transport and recognition

mod queue;
mod recognition;
mod sender;

pub use queue::{ChunkQueue, ChunkReceiver, chunk_queue};
pub use recognition::{RecognitionConsumer, RecognitionOutcome};
pub use sender::SessionSender;
