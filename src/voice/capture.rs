//! Audio capture from microphone

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::frame::{AudioFrame, f32_to_i16, frame_samples};
use crate::stream::ChunkQueue;
use crate::{Error, Result};

/// Anything that can fill a [`ChunkQueue`] with capture frames
pub trait AudioCaptureSource {
    /// Begin producing frames into `queue`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be started
    fn start(&mut self, queue: ChunkQueue) -> Result<()>;

    /// Stop producing, flush any partial frame as a padded full frame, then
    /// close the queue
    fn stop(&mut self);
}

/// Cuts a sample stream into frames of exactly `frame_samples`
#[derive(Debug)]
struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    const fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending: Vec::new(),
        }
    }

    /// Buffer `samples` and emit every frame that is now full
    fn extend(&mut self, samples: impl IntoIterator<Item = i16>, mut emit: impl FnMut(AudioFrame)) {
        self.pending.extend(samples);
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let full = std::mem::replace(&mut self.pending, rest);
            emit(AudioFrame::from_samples(&full));
        }
    }

    /// Zero-pad whatever is left into one last full frame
    fn finish(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let mut tail = std::mem::take(&mut self.pending);
        tail.resize(self.frame_samples, 0);
        Some(AudioFrame::from_samples(&tail))
    }
}

/// Captures fixed-duration frames from the default input device
pub struct MicrophoneCapture {
    device: Device,
    config: StreamConfig,
    assembler: Arc<Mutex<FrameAssembler>>,
    queue: Option<ChunkQueue>,
    stream: Option<Stream>,
}

impl MicrophoneCapture {
    /// Open the default input device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports the requested rate
    pub fn new(sample_rate: u32, chunk_ms: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = |channels: u16| -> Result<Option<cpal::SupportedStreamConfigRange>> {
            Ok(device
                .supported_input_configs()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                }))
        };

        // Mono preferred; stereo devices are downmixed in the callback
        let range = match supported(1)? {
            Some(range) => range,
            None => supported(2)?
                .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?,
        };

        let config = range.with_sample_rate(SampleRate(sample_rate)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            chunk_ms,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            assembler: Arc::new(Mutex::new(FrameAssembler::new(frame_samples(
                sample_rate,
                chunk_ms,
            )))),
            queue: None,
            stream: None,
        })
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl AudioCaptureSource for MicrophoneCapture {
    fn start(&mut self, queue: ChunkQueue) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Audio("capture already running".to_string()));
        }

        let channels = usize::from(self.config.channels);
        let assembler = Arc::clone(&self.assembler);
        let producer = queue.clone();

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut assembler = assembler.lock().unwrap_or_else(PoisonError::into_inner);
                    let push = |frame: AudioFrame| {
                        producer.push(frame);
                    };
                    if channels == 1 {
                        assembler.extend(data.iter().copied().map(f32_to_i16), push);
                    } else {
                        let mixed = data.chunks(channels).map(|frame| {
                            #[allow(clippy::cast_precision_loss)]
                            let mixed = frame.iter().sum::<f32>() / frame.len() as f32;
                            f32_to_i16(mixed)
                        });
                        assembler.extend(mixed, push);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);
        self.queue = Some(queue);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }

        let tail = self
            .assembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish();
        if let Some(queue) = self.queue.take() {
            if let Some(frame) = tail {
                queue.push(frame);
            }
            queue.close();
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Record a fixed duration into a single PCM buffer
///
/// # Errors
///
/// Returns error if capture cannot be started
pub async fn record_for(
    capture: &mut dyn AudioCaptureSource,
    duration: std::time::Duration,
) -> Result<Vec<u8>> {
    let (queue, mut receiver) = crate::stream::chunk_queue();
    capture.start(queue)?;
    tokio::time::sleep(duration).await;
    capture.stop();

    let mut pcm = Vec::new();
    while let Some(frame) = receiver.recv().await {
        pcm.extend_from_slice(frame.as_bytes());
    }
    tracing::debug!(bytes = pcm.len(), "recording complete");
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_frame_has_the_configured_length() {
        let frame_samples = frame_samples(16000, 100);
        let mut assembler = FrameAssembler::new(frame_samples);
        let mut frames = Vec::new();

        // uneven callback sizes, like a real device
        for size in [700, 2500, 1, 4000, 333] {
            assembler.extend(std::iter::repeat_n(5, size), |f| frames.push(f));
        }
        frames.extend(assembler.finish());

        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|f| f.len() == frame_samples * 2));
    }

    #[test]
    fn tail_is_padded_with_silence() {
        let mut assembler = FrameAssembler::new(4);
        let mut frames = Vec::new();
        assembler.extend([1, 2, 3, 4, 5, 6], |f| frames.push(f));
        let tail = assembler.finish().unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(tail.as_bytes(), AudioFrame::from_samples(&[5, 6, 0, 0]).as_bytes());
        assert!(assembler.finish().is_none());
    }
}
