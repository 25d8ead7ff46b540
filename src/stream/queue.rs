//! FIFO hand-off between an audio producer and a network/recognition consumer
//!
//! `push` never blocks, so it is safe to call from an audio driver callback.
//! Closure is signalled by dropping the channel's sender: the consumer drains
//! every frame pushed before `close` and then observes `None`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::voice::AudioFrame;

/// Producer side of a chunk queue; clones share the same queue
#[derive(Clone)]
pub struct ChunkQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tx: Mutex<Option<mpsc::UnboundedSender<AudioFrame>>>,
    enqueued: AtomicUsize,
}

/// Consumer side of a chunk queue
pub struct ChunkReceiver {
    rx: mpsc::UnboundedReceiver<AudioFrame>,
    received: usize,
    finished: bool,
}

/// Create a connected queue/receiver pair
#[must_use]
pub fn chunk_queue() -> (ChunkQueue, ChunkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = ChunkQueue {
        inner: Arc::new(QueueInner {
            tx: Mutex::new(Some(tx)),
            enqueued: AtomicUsize::new(0),
        }),
    };
    let receiver = ChunkReceiver {
        rx,
        received: 0,
        finished: false,
    };
    (queue, receiver)
}

impl ChunkQueue {
    /// Append a frame to the tail
    ///
    /// Returns `false` if the queue is closed or the consumer has gone away;
    /// the frame is dropped in that case.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let guard = self.inner.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        if tx.send(frame).is_err() {
            return false;
        }
        self.inner.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Signal end of stream
    ///
    /// Idempotent: returns `true` only for the call that actually closed the queue.
    pub fn close(&self) -> bool {
        let sender = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let closed = sender.is_some();
        if closed {
            tracing::debug!(frames = self.enqueued(), "chunk queue closed");
        }
        closed
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Frames accepted so far
    #[must_use]
    pub fn enqueued(&self) -> usize {
        self.inner.enqueued.load(Ordering::Relaxed)
    }
}

impl ChunkReceiver {
    /// Next frame in FIFO order, or `None` once the queue is closed and drained
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        if self.finished {
            return None;
        }
        let frame = self.rx.recv().await;
        self.observe(frame)
    }

    /// Blocking variant of [`recv`](Self::recv) for worker threads
    ///
    /// Must not be called from within an async task.
    pub fn blocking_recv(&mut self) -> Option<AudioFrame> {
        if self.finished {
            return None;
        }
        let frame = self.rx.blocking_recv();
        self.observe(frame)
    }

    fn observe(&mut self, frame: Option<AudioFrame>) -> Option<AudioFrame> {
        if frame.is_some() {
            self.received += 1;
        } else {
            self.finished = true;
        }
        frame
    }

    /// Frames handed out so far
    #[must_use]
    pub const fn received(&self) -> usize {
        self.received
    }

    /// Whether closure has been observed
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}
