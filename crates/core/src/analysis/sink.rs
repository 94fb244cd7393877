use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, TryLockError,
    },
};

use ringbuf::{
    traits::{Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::{CurrentsError, Result};

/// Destination for raw PCM blocks delivered by a capture stream.
///
/// Implementations are called from the audio backend's callback thread and
/// must not block.
pub trait ByteSink: Send + 'static {
    fn write_block(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<F> ByteSink for F
where
    F: FnMut(&[u8]) -> Result<()> + Send + 'static,
{
    fn write_block(&mut self, bytes: &[u8]) -> Result<()> {
        self(bytes)
    }
}

/// Producer side of the extractor's byte ring.
///
/// Clones share one producer. Only one capture stream is live at a time, so
/// the lock is uncontended; the callback never waits on it.
#[derive(Clone)]
pub struct ExtractorSink {
    shared: Arc<SinkShared>,
}

struct SinkShared {
    producer: Mutex<HeapProd<u8>>,
    frame_bytes: usize,
    closed: AtomicBool,
    dropped_blocks: AtomicU64,
}

impl ExtractorSink {
    /// Allocates a ring of `capacity` bytes and returns both halves.
    pub(crate) fn with_capacity(capacity: usize, frame_bytes: usize) -> (Self, HeapCons<u8>) {
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        let sink = Self {
            shared: Arc::new(SinkShared {
                producer: Mutex::new(producer),
                frame_bytes: frame_bytes.max(1),
                closed: AtomicBool::new(false),
                dropped_blocks: AtomicU64::new(0),
            }),
        };
        (sink, consumer)
    }

    /// Marks the sink as broken; later writes fail with
    /// [`CurrentsError::SinkClosed`].
    pub(crate) fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Blocks discarded because the ring was full or briefly contended.
    pub fn dropped_blocks(&self) -> u64 {
        self.shared.dropped_blocks.load(Ordering::Relaxed)
    }

    fn drop_block(&self) -> Result<()> {
        self.shared.dropped_blocks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl fmt::Debug for ExtractorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorSink")
            .field("frame_bytes", &self.shared.frame_bytes)
            .field("closed", &self.is_closed())
            .field("dropped_blocks", &self.dropped_blocks())
            .finish()
    }
}

impl ByteSink for ExtractorSink {
    fn write_block(&mut self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(CurrentsError::SinkClosed);
        }
        // Whole frames only, so the ring never holds a split sample pair.
        if bytes.len() % self.shared.frame_bytes != 0 {
            return Err(CurrentsError::BufferFault(format!(
                "block of {} bytes is not a whole number of {}-byte frames",
                bytes.len(),
                self.shared.frame_bytes
            )));
        }

        let mut producer = match self.shared.producer.try_lock() {
            Ok(producer) => producer,
            Err(TryLockError::WouldBlock) => return self.drop_block(),
            Err(TryLockError::Poisoned(_)) => {
                return Err(CurrentsError::BufferFault("sink producer has been poisoned".into()))
            }
        };

        if producer.vacant_len() < bytes.len() {
            drop(producer);
            return self.drop_block();
        }
        producer.push_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ringbuf::traits::Consumer;

    use super::*;

    #[test]
    fn writes_whole_blocks_into_the_ring() {
        let (mut sink, mut consumer) = ExtractorSink::with_capacity(32, 8);
        sink.write_block(&[7; 16]).unwrap();
        assert_eq!(consumer.occupied_len(), 16);

        let mut out = [0; 16];
        assert_eq!(consumer.pop_slice(&mut out), 16);
        assert_eq!(out, [7; 16]);
    }

    #[test]
    fn drops_blocks_that_do_not_fit() {
        let (mut sink, consumer) = ExtractorSink::with_capacity(24, 8);
        sink.write_block(&[1; 16]).unwrap();
        sink.write_block(&[2; 16]).unwrap();
        assert_eq!(consumer.occupied_len(), 16);
        assert_eq!(sink.dropped_blocks(), 1);
    }

    #[test]
    fn rejects_partial_frames() {
        let (mut sink, _consumer) = ExtractorSink::with_capacity(32, 8);
        assert!(matches!(
            sink.write_block(&[0; 12]),
            Err(CurrentsError::BufferFault(_))
        ));
    }

    #[test]
    fn closed_sink_reports_failure() {
        let (mut sink, _consumer) = ExtractorSink::with_capacity(32, 8);
        let observer = sink.clone();
        observer.close();
        assert_eq!(sink.write_block(&[0; 8]), Err(CurrentsError::SinkClosed));
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let mut sink = move |bytes: &[u8]| -> Result<()> {
            counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            Ok(())
        };
        sink.write_block(&[0; 4]).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 4);
    }
}
