//! Voice chatter - real-time voice chat between a microphone device and a
//! cloud conversational agent
//!
//! This library provides both halves of the system:
//! - Device client (microphone capture, frame streaming, reply playback)
//! - Backend server (streaming recognition, persona reply, speech synthesis)
//! - Pluggable speech services (Google Cloud, offline fallbacks)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Device client                │
//! │   Capture  │  ChunkQueue  │  Sender  │  Play │
//! └──────────────────────┬───────────────────────┘
//!                        │ /ws/voice  (PCM frames, end, result)
//! ┌──────────────────────▼───────────────────────┐
//! │                Backend server                │
//! │   Session  │  Recognition  │  Pipeline       │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────┐
//! │               Speech services                │
//! │   STT  │  LLM (persona)  │  TTS              │
//! └──────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod persona;
pub mod services;
pub mod session;
pub mod stream;
pub mod voice;

pub use api::{ApiServer, ApiServerBuilder};
pub use client::{VoiceClient, http::HttpVoiceClient};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use services::Services;
pub use session::{Session, SessionState};
