// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded asynchronous read delivery.
//!
//! A [`Reader`] owns at most one background thread that pulls samples with a
//! `ReadFn` and hands them to a `WriteFn`, honouring the client's
//! [`DeliveryControl`]:
//!
//! | field | effect | unlimited |
//! |-------|--------|-----------|
//! | `max_samples` | samples delivered before the task ends | `0xFFFF` |
//! | `max_elapsed_time` | ms before the task ends | `0` |
//! | `max_bytes_per_second` | token bucket rate | `0` |
//! | `min_pace_period` | ms between two deliveries | `0` |
//!
//! Any other `max_samples` value is an exact count, so `0` delivers nothing.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub use crate::protocol::{DeliveryControl, MAX_SAMPLES_UNLIMITED};
use crate::token_bucket::TokenBucket;

/// Pull one sample into the buffer, waiting at most the given time.
pub type ReadFn<R> = fn(&R, &mut Vec<u8>, Duration) -> bool;

/// Deliver one sample; `false` means "try again later".
pub type WriteFn<W> = fn(&W, &[u8], Duration) -> bool;

/// Pause between two failed delivery attempts.
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cancel flag the worker can also sleep on.
#[derive(Default)]
struct CancelToken {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl CancelToken {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `timeout` unless cancelled first. Returns the cancel state.
    fn wait(&self, timeout: Duration) -> bool {
        let mut guard = self.lock.lock();
        if self.is_cancelled() {
            return true;
        }
        self.cv.wait_for(&mut guard, timeout);
        self.is_cancelled()
    }
}

struct Worker {
    cancel: Arc<CancelToken>,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// One-at-a-time background read task.
pub struct Reader<R, W> {
    name: String,
    poll_ceiling: Duration,
    worker: Mutex<Option<Worker>>,
    _args: PhantomData<fn(R, W)>,
}

impl<R, W> Reader<R, W> {
    /// `poll_ceiling` bounds every single `ReadFn` call.
    pub fn new(name: impl Into<String>, poll_ceiling: Duration) -> Self {
        Self {
            name: name.into(),
            poll_ceiling,
            worker: Mutex::new(None),
            _args: PhantomData,
        }
    }

    /// Cancel the running task, if any, and wait for it to exit.
    pub fn stop_reading(&self) {
        let worker = self.worker.lock().take();
        if let Some(w) = worker {
            w.cancel.cancel();
            // The task may own the last reference to its client.
            if w.handle.thread().id() == std::thread::current().id() {
                return;
            }
            if w.handle.join().is_err() {
                log::error!("[XRCE] reader {} panicked", self.name);
            }
            log::debug!("[XRCE] reader {} stopped", self.name);
        }
    }

    /// Whether a task is currently delivering.
    pub fn is_reading(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }
}

impl<R: Send + 'static, W: Send + 'static> Reader<R, W> {
    /// Spawn the delivery task.
    ///
    /// Returns `false`, without effect, while a previous task is still
    /// running. A task that already ran to completion is reaped first.
    pub fn start_reading(
        &self,
        delivery_control: DeliveryControl,
        read_fn: ReadFn<R>,
        read_args: R,
        write_fn: WriteFn<W>,
        write_args: W,
    ) -> bool {
        let mut slot = self.worker.lock();
        if let Some(w) = slot.as_ref() {
            if !w.handle.is_finished() {
                return false;
            }
        }
        if let Some(done) = slot.take() {
            let _ = done.handle.join();
        }

        let cancel = Arc::new(CancelToken::default());
        let task_cancel = cancel.clone();
        let ceiling = self.poll_ceiling;
        let spawned = std::thread::Builder::new()
            .name(format!("xrce-read-{}", self.name))
            .spawn(move || {
                read_loop(
                    delivery_control,
                    ceiling,
                    &task_cancel,
                    read_fn,
                    read_args,
                    write_fn,
                    write_args,
                );
            });

        match spawned {
            Ok(handle) => {
                log::debug!(
                    "[XRCE] reader {} started (max_samples={}, max_elapsed={}ms, rate={}B/s)",
                    self.name,
                    delivery_control.max_samples,
                    delivery_control.max_elapsed_time,
                    delivery_control.max_bytes_per_second
                );
                *slot = Some(Worker { cancel, handle });
                true
            }
            Err(e) => {
                log::warn!("[XRCE] failed to spawn reader {}: {}", self.name, e);
                false
            }
        }
    }
}

impl<R, W> Drop for Reader<R, W> {
    fn drop(&mut self) {
        self.stop_reading();
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

fn read_loop<R, W>(
    dc: DeliveryControl,
    ceiling: Duration,
    cancel: &CancelToken,
    read_fn: ReadFn<R>,
    read_args: R,
    write_fn: WriteFn<W>,
    write_args: W,
) {
    let deadline = (dc.max_elapsed_time != 0)
        .then(|| Instant::now() + Duration::from_millis(u64::from(dc.max_elapsed_time)));
    let pace = Duration::from_millis(u64::from(dc.min_pace_period));
    let mut bucket = TokenBucket::new(u64::from(dc.max_bytes_per_second), 0);
    let mut delivered: u32 = 0;
    let mut data = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return;
        }
        if dc.max_samples != MAX_SAMPLES_UNLIMITED && delivered >= u32::from(dc.max_samples) {
            return;
        }
        let timeout = match remaining(deadline) {
            Some(left) if left.is_zero() => return,
            Some(left) => left.min(ceiling),
            None => ceiling,
        };

        data.clear();
        if !read_fn(&read_args, &mut data, timeout) {
            continue;
        }

        let len = data.len() as u64;
        let mut dropped = false;
        while !bucket.consume(len) {
            let wait = bucket.time_until_available(len);
            if wait == Duration::MAX {
                log::warn!("[XRCE] sample of {} bytes exceeds rate limit burst, dropped", len);
                dropped = true;
                break;
            }
            if cancel.wait(wait.min(ceiling)) || remaining(deadline).is_some_and(|d| d.is_zero()) {
                return;
            }
        }
        if dropped {
            continue;
        }

        while !write_fn(&write_args, &data, timeout) {
            if cancel.wait(WRITE_RETRY_BACKOFF) || remaining(deadline).is_some_and(|d| d.is_zero()) {
                return;
            }
        }
        delivered += 1;

        if !pace.is_zero() && cancel.wait(pace) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        reads: AtomicUsize,
        writes: AtomicUsize,
        failures_left: AtomicUsize,
    }

    fn read_always(c: &Arc<Counter>, buf: &mut Vec<u8>, _timeout: Duration) -> bool {
        c.reads.fetch_add(1, Ordering::SeqCst);
        buf.extend_from_slice(&[1, 2, 3, 4]);
        true
    }

    fn read_never(_c: &Arc<Counter>, _buf: &mut Vec<u8>, timeout: Duration) -> bool {
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        false
    }

    fn write_count(c: &Arc<Counter>, _data: &[u8], _timeout: Duration) -> bool {
        if c.failures_left.load(Ordering::SeqCst) > 0 {
            c.failures_left.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        c.writes.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn reader() -> Reader<Arc<Counter>, Arc<Counter>> {
        Reader::new("test", Duration::from_millis(20))
    }

    fn wait_idle(r: &Reader<Arc<Counter>, Arc<Counter>>) {
        let start = Instant::now();
        while r.is_reading() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn dc(max_samples: u16, max_elapsed_time: u16) -> DeliveryControl {
        DeliveryControl {
            max_samples,
            max_elapsed_time,
            ..DeliveryControl::default()
        }
    }

    #[test]
    fn test_second_start_is_rejected() {
        let r = reader();
        let c = Arc::new(Counter::default());
        assert!(r.start_reading(
            dc(MAX_SAMPLES_UNLIMITED, 0),
            read_never,
            c.clone(),
            write_count,
            c.clone()
        ));
        assert!(!r.start_reading(
            dc(MAX_SAMPLES_UNLIMITED, 0),
            read_never,
            c.clone(),
            write_count,
            c.clone()
        ));
        assert!(r.is_reading());
        r.stop_reading();
        assert!(!r.is_reading());
    }

    #[test]
    fn test_exact_sample_count() {
        let r = reader();
        let c = Arc::new(Counter::default());
        assert!(r.start_reading(dc(3, 0), read_always, c.clone(), write_count, c.clone()));
        wait_idle(&r);
        assert_eq!(c.writes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_samples_delivers_nothing() {
        let r = reader();
        let c = Arc::new(Counter::default());
        assert!(r.start_reading(dc(0, 0), read_always, c.clone(), write_count, c.clone()));
        wait_idle(&r);
        assert_eq!(c.reads.load(Ordering::SeqCst), 0);
        assert_eq!(c.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deadline_ends_unlimited_read() {
        let r = reader();
        let c = Arc::new(Counter::default());
        let start = Instant::now();
        assert!(r.start_reading(
            dc(MAX_SAMPLES_UNLIMITED, 100),
            read_never,
            c.clone(),
            write_count,
            c.clone()
        ));
        wait_idle(&r);
        assert!(!r.is_reading());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_write_is_retried() {
        let r = reader();
        let c = Arc::new(Counter::default());
        c.failures_left.store(2, Ordering::SeqCst);
        assert!(r.start_reading(dc(1, 0), read_always, c.clone(), write_count, c.clone()));
        wait_idle(&r);
        assert_eq!(c.writes.load(Ordering::SeqCst), 1);
        assert_eq!(c.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_allows_restart() {
        let r = reader();
        let c = Arc::new(Counter::default());
        r.stop_reading();
        assert!(r.start_reading(
            dc(MAX_SAMPLES_UNLIMITED, 0),
            read_never,
            c.clone(),
            write_count,
            c.clone()
        ));
        r.stop_reading();
        r.stop_reading();
        assert!(r.start_reading(dc(1, 0), read_always, c.clone(), write_count, c.clone()));
        wait_idle(&r);
        assert_eq!(c.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finished_task_can_be_restarted() {
        let r = reader();
        let c = Arc::new(Counter::default());
        assert!(r.start_reading(dc(1, 0), read_always, c.clone(), write_count, c.clone()));
        wait_idle(&r);
        assert!(r.start_reading(dc(1, 0), read_always, c.clone(), write_count, c.clone()));
        wait_idle(&r);
        assert_eq!(c.writes.load(Ordering::SeqCst), 2);
    }
}
