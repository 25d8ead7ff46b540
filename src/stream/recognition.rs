//! Server-side streaming recognition consumer
//!
//! The recognition engine runs on a blocking worker and pulls frames from the
//! session's [`ChunkReceiver`] on demand. Interim hypotheses are discarded;
//! the transcript is the last final result.

use std::sync::Arc;

use super::ChunkReceiver;
use crate::services::{RecognitionConfig, Recognizer};
use crate::session::Failure;
use crate::voice::AudioFrame;

/// Counters and transcript for one recognized utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOutcome {
    pub transcript: String,
    /// Frames handed to the engine
    pub frames: usize,
    pub finals: usize,
    pub interim: usize,
}

/// Pull-based frame iterator over a chunk receiver
struct FramePuller<'a> {
    receiver: &'a mut ChunkReceiver,
}

impl Iterator for FramePuller<'_> {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<AudioFrame> {
        self.receiver.blocking_recv()
    }
}

/// Drives one recognition stream per session
#[derive(Clone)]
pub struct RecognitionConsumer {
    recognizer: Arc<dyn Recognizer>,
    config: RecognitionConfig,
}

impl RecognitionConsumer {
    #[must_use]
    pub fn new(recognizer: Arc<dyn Recognizer>, config: RecognitionConfig) -> Self {
        Self { recognizer, config }
    }

    /// Run recognition on the blocking pool
    ///
    /// # Errors
    ///
    /// Returns `Failure::RecognitionEmpty` if nothing was heard and
    /// `Failure::RecognitionFailed` if the engine or worker failed
    pub async fn run(self, mut receiver: ChunkReceiver) -> Result<RecognitionOutcome, Failure> {
        tokio::task::spawn_blocking(move || self.consume(&mut receiver))
            .await
            .map_err(|e| Failure::RecognitionFailed(format!("recognition worker failed: {e}")))?
    }

    /// Consume the stream on the current thread
    ///
    /// Blocks until the engine finishes. Must not be called from an async task.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run)
    pub fn consume(&self, receiver: &mut ChunkReceiver) -> Result<RecognitionOutcome, Failure> {
        let mut transcript = None;
        let mut finals = 0;
        let mut interim = 0;

        {
            let frames = Box::new(FramePuller {
                receiver: &mut *receiver,
            });
            let results = self
                .recognizer
                .streaming_recognize(self.config.clone(), frames)
                .map_err(|e| Failure::RecognitionFailed(e.to_string()))?;

            for result in results {
                let result = result.map_err(|e| Failure::RecognitionFailed(e.to_string()))?;
                if result.is_final {
                    finals += 1;
                    transcript = Some(result.transcript);
                } else {
                    interim += 1;
                }
            }
        }

        let frames = receiver.received();
        if !receiver.is_finished() {
            tracing::debug!(frames, "recognizer closed its stream before end of audio");
        }

        let transcript = transcript
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(Failure::RecognitionEmpty)?;

        tracing::info!(
            recognizer = self.recognizer.name(),
            frames,
            finals,
            interim,
            chars = transcript.chars().count(),
            "utterance recognized"
        );

        Ok(RecognitionOutcome {
            transcript,
            frames,
            finals,
            interim,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FrameSource, RecognitionResult, ResultStream};
    use crate::stream::chunk_queue;
    use crate::{Error, Result};

    /// Emits one hypothesis per frame: interim for all but every tenth
    struct Scripted {
        stop_after: Option<usize>,
    }

    impl Recognizer for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn streaming_recognize<'a>(
            &'a self,
            _config: RecognitionConfig,
            frames: FrameSource<'a>,
        ) -> Result<ResultStream<'a>> {
            let limit = self.stop_after.unwrap_or(usize::MAX);
            Ok(Box::new(frames.take(limit).enumerate().map(|(i, _)| {
                let n = i + 1;
                Ok::<_, Error>(if n % 10 == 0 {
                    RecognitionResult::final_result(format!("final {n}"))
                } else {
                    RecognitionResult::interim(format!("partial {n}"))
                })
            })))
        }
    }

    struct Broken;

    impl Recognizer for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn streaming_recognize<'a>(
            &'a self,
            _config: RecognitionConfig,
            _frames: FrameSource<'a>,
        ) -> Result<ResultStream<'a>> {
            Err(Error::Stt("permission denied".into()))
        }
    }

    fn consumer(recognizer: impl Recognizer + 'static) -> RecognitionConsumer {
        RecognitionConsumer::new(Arc::new(recognizer), RecognitionConfig::new("ja-JP", 16000))
    }

    fn filled(n: usize) -> ChunkReceiver {
        let (queue, receiver) = chunk_queue();
        for _ in 0..n {
            queue.push(AudioFrame::from_samples(&[0; 4]));
        }
        queue.close();
        receiver
    }

    #[test]
    fn last_final_result_wins() {
        let mut receiver = filled(25);
        let outcome = consumer(Scripted { stop_after: None })
            .consume(&mut receiver)
            .unwrap();

        assert_eq!(outcome.transcript, "final 20");
        assert_eq!(outcome.frames, 25);
        assert_eq!(outcome.finals, 2);
        assert_eq!(outcome.interim, 23);
    }

    #[test]
    fn early_close_is_not_an_error() {
        let mut receiver = filled(40);
        let outcome = consumer(Scripted {
            stop_after: Some(10),
        })
        .consume(&mut receiver)
        .unwrap();

        assert_eq!(outcome.transcript, "final 10");
        assert_eq!(outcome.frames, 10);
        assert!(!receiver.is_finished());
    }

    #[test]
    fn only_interim_results_mean_no_speech() {
        let mut receiver = filled(5);
        let err = consumer(Scripted { stop_after: None })
            .consume(&mut receiver)
            .unwrap_err();
        assert_eq!(err, Failure::RecognitionEmpty);
    }

    #[test]
    fn engine_error_is_recognition_failure() {
        let mut receiver = filled(1);
        let err = consumer(Broken).consume(&mut receiver).unwrap_err();
        assert_eq!(err.reason(), "recognition_failed");
    }

    #[tokio::test]
    async fn runs_on_blocking_worker_while_frames_arrive() {
        let (queue, receiver) = chunk_queue();
        let task = tokio::spawn(consumer(Scripted { stop_after: None }).run(receiver));

        for _ in 0..30 {
            queue.push(AudioFrame::from_samples(&[1; 4]));
            tokio::task::yield_now().await;
        }
        queue.close();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.transcript, "final 30");
        assert_eq!(outcome.frames, 30);
    }
}
