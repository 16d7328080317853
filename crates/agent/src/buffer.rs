//! StreamBuffer: push-when-ready production, pull-what's-new consumption.
//!
//! One producer appends text chunks; any number of pollers read them.
//! Every operation takes the same short lock and never waits on I/O.
//!
//! Two read modes:
//!
//! - [`ReadMode::Consuming`]: each read returns only the chunks appended
//!   since the previous read.
//! - [`ReadMode::Accumulating`]: each read returns everything produced so
//!   far, for protocols where every poll response replaces the last one.
//!
//! A buffer reports finished only once the producer is done **and** a
//! read has drained it afterwards, so no produced text goes unseen.

use pollbridge_config::ReadMode;
use pollbridge_core::error::TaskError;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// The result of one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Increment {
    pub text: String,
    pub finished: bool,
}

#[derive(Default)]
struct BufferState {
    chunks: Vec<String>,
    cursor: usize,
    /// Concatenation of all chunks, kept so accumulating reads are O(1)
    joined: String,
    producer_done: bool,
    drained_after_done: bool,
}

pub struct StreamBuffer {
    mode: ReadMode,
    state: Mutex<BufferState>,
}

impl StreamBuffer {
    pub fn new(mode: ReadMode) -> Self {
        Self {
            mode,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk. Pushing after [`set_producer_done`](Self::set_producer_done)
    /// is rejected rather than silently dropped.
    pub fn push(&self, text: impl Into<String>) -> Result<(), TaskError> {
        let text = text.into();
        let mut state = self.lock();
        if state.producer_done {
            warn!(len = text.len(), "Chunk pushed after the producer finished");
            return Err(TaskError::ProducerFinished);
        }
        if text.is_empty() {
            return Ok(());
        }
        state.joined.push_str(&text);
        state.chunks.push(text);
        Ok(())
    }

    pub fn set_producer_done(&self) {
        self.lock().producer_done = true;
    }

    pub fn is_producer_done(&self) -> bool {
        self.lock().producer_done
    }

    /// Read up to the current end of the buffer.
    pub fn read_increment(&self) -> Increment {
        let mut state = self.lock();
        let end = state.chunks.len();

        let text = match self.mode {
            ReadMode::Consuming => state.chunks[state.cursor..end].concat(),
            ReadMode::Accumulating => state.joined.clone(),
        };
        state.cursor = end;

        if state.producer_done {
            state.drained_after_done = true;
        }
        Increment {
            text,
            finished: state.drained_after_done,
        }
    }

    /// Whether every pushed chunk has been read at least once.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.cursor == state.chunks.len()
    }

    /// Producer done and drained by a read that happened afterwards.
    pub fn is_finished(&self) -> bool {
        self.lock().drained_after_done
    }

    /// Number of chunks pushed so far.
    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All text produced so far, without moving the cursor.
    pub fn snapshot(&self) -> String {
        self.lock().joined.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn consuming_reads_return_only_new_chunks() {
        let buffer = StreamBuffer::new(ReadMode::Consuming);
        buffer.push("14:").unwrap();
        buffer.push("05").unwrap();
        assert_eq!(buffer.read_increment().text, "14:05");

        buffer.push(" CST").unwrap();
        let inc = buffer.read_increment();
        assert_eq!(inc.text, " CST");
        assert!(!inc.finished);
        assert_eq!(buffer.read_increment().text, "");
    }

    #[test]
    fn accumulating_reads_return_everything_so_far() {
        let buffer = StreamBuffer::new(ReadMode::Accumulating);
        buffer.push("14:05").unwrap();
        assert_eq!(buffer.read_increment().text, "14:05");
        buffer.push(" CST").unwrap();
        assert_eq!(buffer.read_increment().text, "14:05 CST");
        assert!(buffer.is_drained());
    }

    #[test]
    fn finished_requires_a_read_after_producer_done() {
        let buffer = StreamBuffer::new(ReadMode::Consuming);
        buffer.push("answer").unwrap();
        assert_eq!(buffer.read_increment().text, "answer");
        buffer.set_producer_done();

        // drained already, but nobody has looked since the producer finished
        assert!(buffer.is_drained());
        assert!(!buffer.is_finished());

        let inc = buffer.read_increment();
        assert_eq!(inc, Increment { text: String::new(), finished: true });
        assert!(buffer.is_finished());
    }

    #[test]
    fn finished_poll_carries_the_tail() {
        let buffer = StreamBuffer::new(ReadMode::Consuming);
        buffer.push("14:05 CST").unwrap();
        buffer.set_producer_done();
        assert!(!buffer.is_finished());

        let inc = buffer.read_increment();
        assert_eq!(inc.text, "14:05 CST");
        assert!(inc.finished);

        // idempotent after drain
        assert_eq!(buffer.read_increment(), Increment { text: String::new(), finished: true });
    }

    #[test]
    fn push_after_done_is_rejected() {
        let buffer = StreamBuffer::new(ReadMode::Consuming);
        buffer.set_producer_done();
        assert_eq!(buffer.push("late"), Err(TaskError::ProducerFinished));
        assert!(buffer.is_empty());
    }

    #[test]
    fn concurrent_reads_neither_skip_nor_duplicate() {
        let buffer = Arc::new(StreamBuffer::new(ReadMode::Consuming));
        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    buffer.push(format!("{i},")).unwrap();
                }
                buffer.set_producer_done();
            })
        };

        let mut seen = String::new();
        loop {
            let inc = buffer.read_increment();
            seen.push_str(&inc.text);
            if inc.finished {
                break;
            }
            std::thread::yield_now();
        }
        producer.join().unwrap();

        let expected: String = (0..500).map(|i| format!("{i},")).collect();
        assert_eq!(seen, expected);
        assert_eq!(buffer.snapshot(), expected);
    }
}
