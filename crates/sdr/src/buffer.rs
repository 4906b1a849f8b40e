// Copyright 2025-2026 CEMAXECUTER LLC

//! Bounded-latency producer/consumer buffer of IQ sample vectors.
//!
//! Vectors are interleaved i16 I/Q pairs. The buffer never drops; memory
//! pressure is the caller's problem and is what the `queued_samples`
//! overrun check in the worker is for.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner {
    queue: VecDeque<Vec<i16>>,
    /// Queued IQ samples (not vectors), for overrun detection.
    queued: usize,
    end: bool,
}

pub struct SampleBuffer {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                queued: 0,
                end: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Queue one sample vector.
    pub fn push(&self, samples: Vec<i16>) {
        let mut inner = self.inner.lock().unwrap();
        inner.queued += samples.len() / 2;
        inner.queue.push_back(samples);
        self.cond.notify_all();
    }

    /// Signal end of stream; pending vectors are still delivered.
    pub fn push_end(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.end = true;
        self.cond.notify_all();
    }

    /// Block until a vector is available or end is signalled. Returns an
    /// empty vector once the stream has ended and drained.
    pub fn pull(&self) -> Vec<i16> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(samples) = inner.queue.pop_front() {
                inner.queued -= samples.len() / 2;
                return samples;
            }
            if inner.end {
                return Vec::new();
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Currently queued sample count (samples, not vectors).
    pub fn queued_samples(&self) -> usize {
        self.inner.lock().unwrap().queued
    }

    /// Block until at least `min_samples` are queued or the stream ends.
    /// Used by consumers to refill to a nominal level after an underrun.
    pub fn wait_buffer_fill(&self, min_samples: usize) {
        let mut inner = self.inner.lock().unwrap();
        while inner.queued < min_samples && !inner.end {
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// True once end was signalled and every vector was consumed.
    pub fn end_reached(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.end && inner.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order_and_counts() {
        let buf = SampleBuffer::new();
        buf.push(vec![1, 2, 3, 4]);
        buf.push(vec![5, 6]);
        assert_eq!(buf.queued_samples(), 3);
        assert_eq!(buf.pull(), vec![1, 2, 3, 4]);
        assert_eq!(buf.queued_samples(), 1);
        assert_eq!(buf.pull(), vec![5, 6]);
        assert_eq!(buf.queued_samples(), 0);
    }

    #[test]
    fn test_pull_returns_empty_after_end() {
        let buf = SampleBuffer::new();
        buf.push(vec![7, 8]);
        buf.push_end();
        assert_eq!(buf.pull(), vec![7, 8]);
        assert!(buf.pull().is_empty());
        assert!(buf.end_reached());
    }

    #[test]
    fn test_pull_blocks_until_push() {
        let buf = Arc::new(SampleBuffer::new());
        let producer = {
            let buf = buf.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buf.push(vec![9, 9]);
            })
        };
        assert_eq!(buf.pull(), vec![9, 9]);
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_buffer_fill_wakes_at_level() {
        let buf = Arc::new(SampleBuffer::new());
        let producer = {
            let buf = buf.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    thread::sleep(Duration::from_millis(5));
                    buf.push(vec![0; 20]); // 10 samples each
                }
            })
        };
        buf.wait_buffer_fill(50);
        assert!(buf.queued_samples() >= 50);
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_buffer_fill_released_by_end() {
        let buf = Arc::new(SampleBuffer::new());
        let ender = {
            let buf = buf.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                buf.push_end();
            })
        };
        buf.wait_buffer_fill(1_000_000);
        ender.join().unwrap();
    }
}
