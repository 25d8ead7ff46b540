//! Voice processing module
//!
//! Handles PCM framing, microphone capture and reply playback.
//! Recognition and synthesis live behind the service traits (see `services`)

mod capture;
mod frame;
mod playback;

pub use capture::{AudioCaptureSource, MicrophoneCapture, record_for};
pub use frame::{
    AUDIO_ENCODING, AudioFrame, CHANNELS, CHUNK_MS, SAMPLE_RATE, SAMPLE_WIDTH, WavAudio,
    f32_to_i16, frame_len, frame_samples, i16_to_f32, pcm_to_samples, pcm_to_wav,
    samples_to_pcm, silence, split_frames, strip_wav_header, wav_to_pcm,
};
pub use playback::{PlaybackSink, SpeakerPlayback, WavFileSink};
