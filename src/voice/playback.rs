//! Audio playback to speakers or to a WAV file

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::frame::{i16_to_f32, pcm_to_samples, pcm_to_wav};
use crate::{Error, Result};

/// Destination for a synthesized reply
pub trait PlaybackSink {
    /// Play 16-bit mono PCM and block until it has drained
    ///
    /// # Errors
    ///
    /// Returns error if the payload is misaligned or the device fails
    fn play(&mut self, pcm: &[u8], sample_rate: u32) -> Result<()>;
}

/// Plays replies through the default output device
pub struct SpeakerPlayback {
    device: cpal::Device,
}

impl SpeakerPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self { device })
    }

    fn output_config(&self, sample_rate: u32) -> Result<StreamConfig> {
        let fits = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let range = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| fits(c, 1))
            .or_else(|| {
                // Fallback: duplicate the mono signal to both channels
                self.device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| fits(c, 2))
            })
            .ok_or_else(|| {
                Error::Audio(format!("no output config supports {sample_rate} Hz"))
            })?;

        Ok(range.with_sample_rate(SampleRate(sample_rate)).config())
    }
}

impl PlaybackSink for SpeakerPlayback {
    fn play(&mut self, pcm: &[u8], sample_rate: u32) -> Result<()> {
        let samples: Arc<Vec<f32>> = Arc::new(
            pcm_to_samples(pcm)?
                .into_iter()
                .map(i16_to_f32)
                .collect(),
        );
        if samples.is_empty() {
            return Ok(());
        }

        let config = self.output_config(sample_rate)?;
        let channels = usize::from(config.channels);

        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            self.device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.load(Ordering::Relaxed);
                            let sample = if let Some(&s) = samples.get(pos) {
                                position.store(pos + 1, Ordering::Relaxed);
                                s
                            } else {
                                finished.store(true, Ordering::Release);
                                0.0
                            };
                            frame.fill(sample);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = samples.len() as u64 * 1000 / u64::from(sample_rate);
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Acquire) {
            if Instant::now() > deadline {
                tracing::warn!("playback did not drain before deadline");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device flush its last buffer
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        tracing::debug!(samples = samples.len(), sample_rate, "playback complete");
        Ok(())
    }
}

/// Writes each reply to a WAV file instead of playing it
pub struct WavFileSink {
    path: PathBuf,
    written: usize,
}

impl WavFileSink {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path, written: 0 }
    }

    /// Number of replies written
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Path the next reply goes to; later replies get a numeric suffix
    fn next_path(&self) -> PathBuf {
        if self.written == 0 {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "reply".to_string());
        self.path
            .with_file_name(format!("{stem}-{}.wav", self.written + 1))
    }
}

impl PlaybackSink for WavFileSink {
    fn play(&mut self, pcm: &[u8], sample_rate: u32) -> Result<()> {
        let wav = pcm_to_wav(pcm, sample_rate)?;
        let path = self.next_path();
        std::fs::write(&path, wav)?;
        self.written += 1;
        tracing::info!(path = %path.display(), bytes = pcm.len(), "reply saved");
        Ok(())
    }
}
