//! Blocking byte ring buffer shared by the two bridge threads
//!
//! One mutex guards the indices and storage; `not_full` and `not_empty`
//! condition variables carry the full/empty transitions. Every wait is a
//! predicate loop, so the buffer stays correct with any number of producers
//! and consumers and under spurious wake-ups.
//!
//! ```text
//!            tail                head
//!             │                   │
//!  ┌───┬───┬──▼┬───┬───┬───┬───┬──▼┬───┬───┬───┐
//!  │   │   │ a │ b │ c │ d │ e │   │   │   │   │   capacity = 11
//!  └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//!               unread = (head - tail) mod capacity = 5
//!               free   = capacity - 1 - unread      = 5
//! ```
//!
//! One slot always stays unused so that `head == tail` means empty and
//! `head + 1 == tail` (mod capacity) means full.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::audio::AudioFormat;
use crate::debug_log;
use crate::error::AudioError;
use crate::logging::{DebugCategory, DebugLog};

/// Indices and storage, only touched with the lock held
struct RingState {
    storage: Box<[u8]>,
    head: usize,
    tail: usize,
    closed: bool,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn unread(&self) -> usize {
        (self.head + self.capacity() - self.tail) % self.capacity()
    }

    fn free(&self) -> usize {
        self.capacity() - 1 - self.unread()
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn is_full(&self) -> bool {
        (self.head + 1) % self.capacity() == self.tail
    }

    /// Copy up to `free` bytes in at `head`, wrapping at the end of storage
    fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        let capacity = self.capacity();

        let first = n.min(capacity - self.head);
        self.storage[self.head..self.head + first].copy_from_slice(&data[..first]);
        self.storage[..n - first].copy_from_slice(&data[first..n]);

        self.head = (self.head + n) % capacity;
        n
    }

    /// Copy up to `unread` bytes out from `tail`, wrapping at the end of storage
    fn pop(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.unread());
        let capacity = self.capacity();

        let first = n.min(capacity - self.tail);
        dest[..first].copy_from_slice(&self.storage[self.tail..self.tail + first]);
        dest[first..n].copy_from_slice(&self.storage[..n - first]);

        self.tail = (self.tail + n) % capacity;
        n
    }
}

/// Point-in-time view of the buffer indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSnapshot {
    pub capacity: usize,
    pub head: usize,
    pub tail: usize,
    pub unread: usize,
    pub free: usize,
}

/// Fixed-capacity blocking byte FIFO
pub struct RingBuffer {
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
    log: DebugLog,
}

impl RingBuffer {
    /// Allocate a buffer of `capacity` bytes, `capacity - 1` of them usable
    pub fn new(capacity: usize, log: DebugLog) -> Result<Self, AudioError> {
        if capacity < 2 {
            return Err(AudioError::InvalidCapacity(capacity));
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| AudioError::AllocationFailed(capacity))?;
        storage.resize(capacity, 0u8);

        debug_log!(log, DebugCategory::SharedBuffer, "ring buffer allocated: {} bytes", capacity);

        Ok(Self {
            state: Mutex::new(RingState {
                storage: storage.into_boxed_slice(),
                head: 0,
                tail: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            log,
        })
    }

    /// Size the buffer so that exactly `buffer_us` of audio fits
    pub fn for_duration(format: AudioFormat, buffer_us: u64, log: DebugLog) -> Result<Self, AudioError> {
        Self::new(format.bytes_for(buffer_us).saturating_add(1), log)
    }

    /// Write up to `data.len()` bytes, blocking while the buffer is full.
    ///
    /// Returns the number of bytes actually enqueued, which is less than
    /// requested when free space runs short. Fails only once the buffer has
    /// been closed.
    pub fn write(&self, data: &[u8]) -> Result<usize, AudioError> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();
        while state.is_full() && !state.closed {
            debug_log!(self.log, DebugCategory::Lock, "write waiting on not_full");
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(AudioError::BufferClosed);
        }

        let n = state.push(data);
        debug_log!(
            self.log,
            DebugCategory::SharedBuffer,
            "wrote {}/{} bytes (head {}, tail {})",
            n,
            data.len(),
            state.head,
            state.tail
        );
        drop(state);

        self.not_empty.notify_all();
        Ok(n)
    }

    /// Read up to `dest.len()` bytes, blocking while the buffer is empty.
    ///
    /// Returns the number of bytes copied into `dest`. After [`close`](Self::close)
    /// remaining bytes can still be drained; a closed and empty buffer
    /// returns [`AudioError::BufferClosed`].
    pub fn read(&self, dest: &mut [u8]) -> Result<usize, AudioError> {
        if dest.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();
        while state.is_empty() && !state.closed {
            debug_log!(self.log, DebugCategory::Lock, "read waiting on not_empty");
            self.not_empty.wait(&mut state);
        }
        if state.is_empty() {
            return Err(AudioError::BufferClosed);
        }

        let n = state.pop(dest);
        debug_log!(
            self.log,
            DebugCategory::SharedBuffer,
            "read {}/{} bytes (head {}, tail {})",
            n,
            dest.len(),
            state.head,
            state.tail
        );
        drop(state);

        self.not_full.notify_all();
        Ok(n)
    }

    /// Write every byte of `data`, blocking as often as needed
    pub fn write_all(&self, mut data: &[u8]) -> Result<(), AudioError> {
        while !data.is_empty() {
            let n = self.write(data)?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Non-blocking write; returns 0 when the buffer is full
    pub fn try_write(&self, data: &[u8]) -> Result<usize, AudioError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AudioError::BufferClosed);
        }

        let n = state.push(data);
        drop(state);

        if n > 0 {
            self.not_empty.notify_all();
        }
        Ok(n)
    }

    /// Non-blocking read; returns 0 when the buffer is empty
    pub fn try_read(&self, dest: &mut [u8]) -> Result<usize, AudioError> {
        let mut state = self.state.lock();
        if state.closed && state.is_empty() {
            return Err(AudioError::BufferClosed);
        }

        let n = state.pop(dest);
        drop(state);

        if n > 0 {
            self.not_full.notify_all();
        }
        Ok(n)
    }

    /// Close the buffer and wake every blocked reader and writer
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);

        debug_log!(self.log, DebugCategory::SharedBuffer, "ring buffer closed");
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Allocated slots, including the reserved one
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    /// Bytes that can be held at once
    pub fn usable_capacity(&self) -> usize {
        self.capacity() - 1
    }

    /// Unread bytes
    pub fn len(&self) -> usize {
        self.state.lock().unread()
    }

    pub fn free_space(&self) -> usize {
        self.state.lock().free()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().is_full()
    }

    pub fn snapshot(&self) -> RingSnapshot {
        let state = self.state.lock();
        RingSnapshot {
            capacity: state.capacity(),
            head: state.head,
            tail: state.tail,
            unread: state.unread(),
            free: state.free(),
        }
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize, log: DebugLog) -> Result<SharedRingBuffer, AudioError> {
    RingBuffer::new(capacity, log).map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    fn buffer(capacity: usize) -> RingBuffer {
        RingBuffer::new(capacity, DebugLog::disabled()).unwrap()
    }

    fn assert_invariants(snap: &RingSnapshot) {
        assert!(snap.head < snap.capacity);
        assert!(snap.tail < snap.capacity);
        assert_eq!(snap.unread, (snap.head + snap.capacity - snap.tail) % snap.capacity);
        assert_eq!(snap.unread + snap.free, snap.capacity - 1);
        assert_eq!(snap.head == snap.tail, snap.unread == 0);
        assert_eq!((snap.head + 1) % snap.capacity == snap.tail, snap.free == 0);
    }

    #[test]
    fn test_rejects_tiny_capacity() {
        assert!(matches!(
            RingBuffer::new(0, DebugLog::disabled()),
            Err(AudioError::InvalidCapacity(0))
        ));
        assert!(matches!(
            RingBuffer::new(1, DebugLog::disabled()),
            Err(AudioError::InvalidCapacity(1))
        ));
        assert!(RingBuffer::new(2, DebugLog::disabled()).is_ok());
    }

    #[test]
    fn test_round_trip_capacity_eleven() {
        let rb = buffer(11);

        assert_eq!(rb.write(&[1, 2, 3]).unwrap(), 3);
        let snap = rb.snapshot();
        assert_eq!((snap.head, snap.tail), (3, 0));

        let mut out = [0u8; 3];
        assert_eq!(rb.read(&mut out).unwrap(), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(rb.snapshot().tail, 3);

        assert_eq!(rb.write(&[4, 5, 6, 7, 8]).unwrap(), 5);
        assert_eq!(rb.snapshot().head, 8);

        // Crosses the end of storage: only 5 of 10 usable slots are free
        assert_eq!(rb.write(&[9, 10, 11, 12, 13, 14, 15]).unwrap(), 5);
        let snap = rb.snapshot();
        assert_eq!((snap.head, snap.tail), (2, 3));
        assert!(rb.is_full());
        assert_invariants(&snap);

        let mut all = [0u8; 11];
        let n = rb.read(&mut all).unwrap();
        assert_eq!(n, 10);
        assert_eq!(&all[..n], &[4, 5, 6, 7, 8, 9, 10, 11, 12, 13]);
        assert!(rb.is_empty());

        let written = 3 + 5 + 5;
        let read = 3 + n;
        assert_eq!(read, written);
    }

    #[test]
    fn test_wraparound_preserves_bytes() {
        let rb = buffer(8);
        let mut out = [0u8; 8];

        rb.write_all(&[0; 6]).unwrap();
        assert_eq!(rb.read(&mut out[..6]).unwrap(), 6);

        // head and tail sit at 6, so this write wraps after two bytes
        let data = [10, 20, 30, 40, 50, 60, 70];
        assert_eq!(rb.write(&data).unwrap(), 7);
        assert_eq!(rb.snapshot().head, 5);

        assert_eq!(rb.read(&mut out).unwrap(), 7);
        assert_eq!(&out[..7], &data);
    }

    #[test]
    fn test_partial_transfers() {
        let rb = buffer(6);
        assert_eq!(rb.write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap(), 5);
        assert_eq!(rb.len(), 5);
        assert_eq!(rb.free_space(), 0);

        let mut out = [0u8; 3];
        assert_eq!(rb.read(&mut out).unwrap(), 3);
        assert_eq!(out, [1, 2, 3]);

        let mut big = [0u8; 16];
        assert_eq!(rb.read(&mut big).unwrap(), 2);
        assert_eq!(&big[..2], &[4, 5]);
    }

    #[test]
    fn test_full_boundary_blocks_until_read() {
        let n = 16;
        let rb = Arc::new(buffer(n));
        let data: Vec<u8> = (0..n as u8 - 1).collect();

        assert_eq!(rb.write(&data).unwrap(), n - 1);
        assert!(rb.is_full());
        assert_eq!(rb.try_write(&[99]).unwrap(), 0);

        let writer = {
            let rb = rb.clone();
            thread::spawn(move || rb.write(&[99]).unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());

        let mut first = [0u8; 1];
        assert_eq!(rb.read(&mut first).unwrap(), 1);
        assert_eq!(writer.join().unwrap(), 1);

        let mut rest = vec![0u8; n];
        let got = rb.read(&mut rest).unwrap();
        assert_eq!(got, n - 1);
        assert_eq!(rest[got - 1], 99);
    }

    #[test]
    fn test_empty_read_blocks_until_write() {
        let rb = Arc::new(buffer(8));
        assert_eq!(rb.try_read(&mut [0u8; 4]).unwrap(), 0);

        let reader = {
            let rb = rb.clone();
            thread::spawn(move || {
                let mut out = [0u8; 4];
                let n = rb.read(&mut out).unwrap();
                out[..n].to_vec()
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());

        rb.write(&[7, 8]).unwrap();
        assert_eq!(reader.join().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_zero_length_calls_never_block() {
        let rb = buffer(4);
        assert_eq!(rb.read(&mut []).unwrap(), 0);
        rb.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(rb.write(&[]).unwrap(), 0);
    }

    #[test]
    fn test_close_wakes_blocked_reader_and_writer() {
        let empty = Arc::new(buffer(4));
        let reader = {
            let rb = empty.clone();
            thread::spawn(move || rb.read(&mut [0u8; 2]))
        };

        let full = Arc::new(buffer(4));
        full.write_all(&[1, 2, 3]).unwrap();
        let writer = {
            let rb = full.clone();
            thread::spawn(move || rb.write(&[4]))
        };

        thread::sleep(Duration::from_millis(50));
        empty.close();
        full.close();

        assert!(matches!(reader.join().unwrap(), Err(AudioError::BufferClosed)));
        assert!(matches!(writer.join().unwrap(), Err(AudioError::BufferClosed)));
    }

    #[test]
    fn test_closed_buffer_drains_before_failing() {
        let rb = buffer(8);
        rb.write_all(&[1, 2, 3]).unwrap();
        rb.close();

        assert!(matches!(rb.write(&[4]), Err(AudioError::BufferClosed)));
        let mut out = [0u8; 8];
        assert_eq!(rb.read(&mut out).unwrap(), 3);
        assert!(matches!(rb.read(&mut out), Err(AudioError::BufferClosed)));
        assert!(matches!(rb.try_read(&mut out), Err(AudioError::BufferClosed)));
    }

    #[test]
    fn test_fifo_across_threads() {
        let rb = Arc::new(buffer(37));
        let chunks: Vec<Vec<u8>> = (0..200u32)
            .map(|i| (0..(i % 23 + 1)).map(|j| (i * 7 + j) as u8).collect())
            .collect();
        let expected: Vec<u8> = chunks.concat();

        let producer = {
            let rb = rb.clone();
            thread::spawn(move || {
                for chunk in &chunks {
                    rb.write_all(chunk).unwrap();
                }
            })
        };

        let mut received = Vec::with_capacity(expected.len());
        let mut scratch = [0u8; 11];
        while received.len() < expected.len() {
            let n = rb.read(&mut scratch).unwrap();
            received.extend_from_slice(&scratch[..n]);
        }

        producer.join().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_multiple_writers_keep_per_writer_order() {
        // 16 usable bytes: with two-byte writes and reads free space stays even
        let rb = Arc::new(buffer(17));
        let writers: Vec<_> = (0..3u8)
            .map(|id| {
                let rb = rb.clone();
                thread::spawn(move || {
                    for seq in 0..50u8 {
                        assert_eq!(rb.write(&[id, seq]).unwrap(), 2);
                    }
                })
            })
            .collect();

        let mut received = Vec::new();
        let mut scratch = [0u8; 2];
        while received.len() < 3 * 50 * 2 {
            let n = rb.read(&mut scratch).unwrap();
            received.extend_from_slice(&scratch[..n]);
        }
        for w in writers {
            w.join().unwrap();
        }

        let mut next = [0u8; 3];
        for frame in received.chunks(2) {
            let (id, seq) = (frame[0] as usize, frame[1]);
            assert_eq!(seq, next[id]);
            next[id] += 1;
        }
        assert_eq!(next, [50, 50, 50]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(Vec<u8>),
        Read(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..24).prop_map(Op::Write),
            (0usize..24).prop_map(Op::Read),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_model_queue(capacity in 2usize..32, ops in prop::collection::vec(op(), 1..64)) {
            let rb = buffer(capacity);
            let mut model = std::collections::VecDeque::new();

            for op in ops {
                match op {
                    Op::Write(data) => {
                        let n = rb.try_write(&data).unwrap();
                        prop_assert_eq!(n, data.len().min(capacity - 1 - model.len()));
                        model.extend(&data[..n]);
                    }
                    Op::Read(len) => {
                        let mut out = vec![0u8; len];
                        let n = rb.try_read(&mut out).unwrap();
                        prop_assert_eq!(n, len.min(model.len()));
                        let expected: Vec<u8> = model.drain(..n).collect();
                        prop_assert_eq!(&out[..n], &expected[..]);
                    }
                }

                let snap = rb.snapshot();
                assert_invariants(&snap);
                prop_assert_eq!(snap.unread, model.len());
            }
        }
    }
}
