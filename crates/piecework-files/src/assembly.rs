//! Ordered digest assembly.
//!
//! Digests land in a buffer sized once, before any work starts, with one
//! fixed slot per piece. Each worker writes only the slot named by the
//! [`PieceIndex`] it owns, so the buffer itself is never locked. A
//! count-down latch tells the orchestrator when every slot has been
//! written and publishes those writes to it.

use crate::chunker::PieceIndex;
use crate::error::HashError;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::error;

/// Pre-sized buffer of `pieces × digest_size` bytes with one slot per piece
pub struct DigestBuffer {
    bytes: Box<[UnsafeCell<u8>]>,
    digest_size: usize,
    pieces: usize,
}

// SAFETY: slots are disjoint and a slot is only reachable through the
// unique `PieceIndex` naming it (see `slot`); whole-buffer reads happen only
// after every writer has released the completion counter.
unsafe impl Sync for DigestBuffer {}

impl DigestBuffer {
    /// Allocate a zeroed buffer
    #[must_use]
    pub fn new(pieces: usize, digest_size: usize) -> Self {
        let len = pieces * digest_size;
        Self {
            bytes: std::iter::repeat_with(|| UnsafeCell::new(0u8))
                .take(len)
                .collect(),
            digest_size,
            pieces,
        }
    }

    /// Number of slots
    #[must_use]
    pub fn pieces(&self) -> usize {
        self.pieces
    }

    /// Width of one slot
    #[must_use]
    pub fn digest_size(&self) -> usize {
        self.digest_size
    }

    /// Total length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer has no slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Writable view of the slot owned by `index`.
    ///
    /// The slicer mints each `PieceIndex` once per run and the type is not
    /// `Clone`, so no two live borrows can name the same slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the buffer.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn slot<'a>(&'a self, index: &'a mut PieceIndex) -> &'a mut [u8] {
        let piece = index.get();
        assert!(
            piece < self.pieces,
            "piece {piece} outside digest buffer of {} pieces",
            self.pieces
        );
        let start = piece * self.digest_size;
        // SAFETY: `start + digest_size <= len` by the assertion above. The
        // pointer is derived from the whole slice, and the exclusive borrow
        // of `index` guarantees no other reference to this range exists.
        unsafe {
            let base = UnsafeCell::raw_get(self.bytes.as_ptr().add(start));
            std::slice::from_raw_parts_mut(base, self.digest_size)
        }
    }

    /// Copy the whole buffer out.
    ///
    /// Callers must have observed every slot's release on the completion
    /// counter first.
    pub(crate) fn to_vec(&self) -> Vec<u8> {
        // SAFETY: all writers have finished (see above) and the counter's
        // mutex ordered their writes before this read.
        unsafe {
            let base = UnsafeCell::raw_get(self.bytes.as_ptr());
            std::slice::from_raw_parts(base, self.bytes.len()).to_vec()
        }
    }
}

impl std::fmt::Debug for DigestBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestBuffer")
            .field("pieces", &self.pieces)
            .field("digest_size", &self.digest_size)
            .finish()
    }
}

/// Outcome of waiting on a [`CompletionCounter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Count reached zero
    Completed,
    /// The deadline passed; pieces still outstanding
    TimedOut(usize),
    /// The stop condition fired; pieces still outstanding
    Stopped(usize),
}

/// Count-down latch released once per piece
#[derive(Debug)]
pub struct CompletionCounter {
    remaining: Mutex<usize>,
    changed: Condvar,
}

impl CompletionCounter {
    /// Create a counter starting at `count`
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            changed: Condvar::new(),
        }
    }

    /// Pieces not yet released
    #[must_use]
    pub fn remaining(&self) -> usize {
        *self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release one piece. Saturates at zero.
    pub fn count_down(&self) {
        self.release(1);
    }

    fn release(&self, n: usize) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        *remaining = remaining.saturating_sub(n);
        drop(remaining);
        self.changed.notify_all();
    }

    /// Wake waiters without changing the count, so they re-check their
    /// stop condition
    pub fn nudge(&self) {
        let _guard = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        self.changed.notify_all();
    }

    /// Block until the count reaches zero, `deadline` passes, or `stop`
    /// returns true. `stop` is polled at least every `poll`.
    pub fn wait(
        &self,
        deadline: Option<Instant>,
        poll: Duration,
        stop: impl Fn() -> bool,
    ) -> WaitOutcome {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *remaining == 0 {
                return WaitOutcome::Completed;
            }
            if stop() {
                return WaitOutcome::Stopped(*remaining);
            }
            let mut timeout = poll;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut(*remaining);
                }
                timeout = timeout.min(deadline - now);
            }
            remaining = self
                .changed
                .wait_timeout(remaining, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Per-run digest buffer, completion counter and failure record
#[derive(Debug)]
pub struct PieceAssembly {
    buffer: DigestBuffer,
    counter: CompletionCounter,
    failed: AtomicBool,
    failure: Mutex<Option<(usize, String)>>,
    abandoned: AtomicUsize,
}

impl PieceAssembly {
    /// Create the assembly for `pieces` pieces of `digest_size` bytes
    #[must_use]
    pub fn new(pieces: usize, digest_size: usize) -> Self {
        Self {
            buffer: DigestBuffer::new(pieces, digest_size),
            counter: CompletionCounter::new(pieces),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            abandoned: AtomicUsize::new(0),
        }
    }

    /// Digest buffer
    #[must_use]
    pub fn buffer(&self) -> &DigestBuffer {
        &self.buffer
    }

    /// Completion counter
    #[must_use]
    pub fn counter(&self) -> &CompletionCounter {
        &self.counter
    }

    /// Take responsibility for releasing `index`.
    ///
    /// The returned guard releases the counter exactly once when dropped,
    /// whether the piece was completed, failed, panicked, or never ran.
    #[must_use]
    pub fn guard(self: &Arc<Self>, index: PieceIndex) -> CompletionGuard {
        CompletionGuard {
            assembly: Arc::clone(self),
            index,
            settled: false,
        }
    }

    /// Record a failed piece; the first failure wins
    pub fn record_failure(&self, piece: usize, reason: impl Into<String>) {
        let reason = reason.into();
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            error!("Piece {} failed: {}", piece, reason);
            *failure = Some((piece, reason));
        }
        drop(failure);
        self.failed.store(true, Ordering::Release);
        self.counter.nudge();
    }

    /// Whether any piece has failed
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// First recorded failure as an error
    #[must_use]
    pub fn failure(&self) -> Option<HashError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(piece, reason)| HashError::PieceFailed {
                piece: *piece,
                reason: reason.clone(),
            })
    }

    /// Pieces released without a digest because the run was stopped
    #[must_use]
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Release pieces that will never be produced, so a wait cannot hang
    /// on a slicer that came up short
    pub(crate) fn forfeit(&self, pieces: usize) {
        self.counter.release(pieces);
    }

    /// Check the produced count and hand back the digests.
    ///
    /// Must only be called once the counter has reached zero.
    ///
    /// # Errors
    ///
    /// Returns the first recorded piece failure,
    /// [`HashError::Cancelled`] if any piece was abandoned, or
    /// [`HashError::PieceCountMismatch`] if `produced` differs from the
    /// number of slots.
    pub fn finish(&self, produced: u64) -> Result<Vec<u8>, HashError> {
        debug_assert_eq!(self.counter.remaining(), 0);

        if let Some(err) = self.failure() {
            return Err(err);
        }
        if self.abandoned() > 0 {
            return Err(HashError::Cancelled);
        }
        let expected = self.buffer.pieces() as u64;
        if produced != expected {
            error!(
                "Unexpected piece count {}; expected {}",
                produced, expected
            );
            return Err(HashError::PieceCountMismatch { produced, expected });
        }
        Ok(self.buffer.to_vec())
    }
}

/// Release guard for one piece
pub struct CompletionGuard {
    assembly: Arc<PieceAssembly>,
    index: PieceIndex,
    settled: bool,
}

impl CompletionGuard {
    /// Piece this guard releases
    #[must_use]
    pub fn piece(&self) -> usize {
        self.index.get()
    }

    /// Write the digest for this piece with `fill`, which receives the
    /// piece's slot.
    ///
    /// # Errors
    ///
    /// Passes through the error returned by `fill`; the failure is also
    /// recorded on the assembly.
    pub fn complete<F>(mut self, fill: F) -> Result<(), String>
    where
        F: FnOnce(&mut [u8]) -> Result<(), String>,
    {
        let result = fill(self.assembly.buffer.slot(&mut self.index));
        if let Err(reason) = &result {
            self.assembly.record_failure(self.index.get(), reason.clone());
        }
        self.settled = true;
        result
    }

    /// Release the piece without computing its digest. The slot stays
    /// empty, so the run can no longer succeed.
    pub fn abandon(mut self) {
        self.assembly.abandoned.fetch_add(1, Ordering::AcqRel);
        self.settled = true;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.settled {
            let reason = if std::thread::panicking() {
                "digest computation panicked"
            } else {
                "piece dropped before it was hashed"
            };
            self.assembly.record_failure(self.index.get(), reason);
        }
        self.assembly.counter.count_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_slots_are_disjoint_and_ordered() {
        let assembly = Arc::new(PieceAssembly::new(4, 2));

        let handles: Vec<_> = (0..4)
            .rev()
            .map(|i| {
                let guard = assembly.guard(PieceIndex::new(i));
                thread::spawn(move || {
                    guard
                        .complete(|slot| {
                            slot.copy_from_slice(&[i as u8, 0xEE]);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(assembly.counter().remaining(), 0);
        let digests = assembly.finish(4).unwrap();
        assert_eq!(digests, [0, 0xEE, 1, 0xEE, 2, 0xEE, 3, 0xEE]);
    }

    #[test]
    fn test_dropped_guard_releases_and_fails() {
        let assembly = Arc::new(PieceAssembly::new(2, 20));
        drop(assembly.guard(PieceIndex::new(1)));

        assert_eq!(assembly.counter().remaining(), 1);
        assert!(assembly.has_failed());
        assert!(matches!(
            assembly.failure(),
            Some(HashError::PieceFailed { piece: 1, .. })
        ));
    }

    #[test]
    fn test_panicking_fill_still_releases() {
        let assembly = Arc::new(PieceAssembly::new(1, 4));
        let guard = assembly.guard(PieceIndex::new(0));

        let result = thread::spawn(move || {
            let _ = guard.complete(|_| panic!("digest exploded"));
        })
        .join();
        assert!(result.is_err());

        assert_eq!(assembly.counter().remaining(), 0);
        let err = assembly.finish(1).unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn test_failed_fill_is_recorded() {
        let assembly = Arc::new(PieceAssembly::new(1, 4));
        let result = assembly
            .guard(PieceIndex::new(0))
            .complete(|_| Err("disk on fire".to_string()));
        assert!(result.is_err());
        assert_eq!(assembly.counter().remaining(), 0);
        assert!(matches!(
            assembly.finish(1),
            Err(HashError::PieceFailed { piece: 0, .. })
        ));
    }

    #[test]
    fn test_abandoned_piece_releases_without_failure() {
        let assembly = Arc::new(PieceAssembly::new(2, 4));
        assembly
            .guard(PieceIndex::new(0))
            .complete(|slot| {
                slot.copy_from_slice(&[1; 4]);
                Ok(())
            })
            .unwrap();
        assembly.guard(PieceIndex::new(1)).abandon();

        assert_eq!(assembly.counter().remaining(), 0);
        assert!(!assembly.has_failed());
        assert_eq!(assembly.abandoned(), 1);
        assert!(matches!(assembly.finish(2), Err(HashError::Cancelled)));
    }

    #[test]
    fn test_first_failure_wins() {
        let assembly = PieceAssembly::new(3, 1);
        assembly.record_failure(2, "second");
        assembly.record_failure(0, "first");
        match assembly.failure() {
            Some(HashError::PieceFailed { piece, reason }) => {
                assert_eq!(piece, 2);
                assert_eq!(reason, "second");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_count_mismatch_is_fault() {
        let assembly = PieceAssembly::new(3, 1);
        assembly.forfeit(3);
        assert!(matches!(
            assembly.finish(2),
            Err(HashError::PieceCountMismatch {
                produced: 2,
                expected: 3
            })
        ));
    }

    #[test]
    #[should_panic(expected = "outside digest buffer")]
    fn test_slot_out_of_range_panics() {
        let buffer = DigestBuffer::new(2, 20);
        let mut index = PieceIndex::new(2);
        let _ = buffer.slot(&mut index);
    }

    #[test]
    fn test_counter_wait_outcomes() {
        let counter = CompletionCounter::new(2);
        let poll = Duration::from_millis(5);

        let deadline = Some(Instant::now() + Duration::from_millis(20));
        assert_eq!(counter.wait(deadline, poll, || false), WaitOutcome::TimedOut(2));
        assert_eq!(counter.wait(None, poll, || true), WaitOutcome::Stopped(2));

        counter.count_down();
        counter.count_down();
        counter.count_down();
        assert_eq!(counter.remaining(), 0);
        assert_eq!(counter.wait(None, poll, || true), WaitOutcome::Completed);
    }

    #[test]
    fn test_counter_wakes_waiter() {
        let counter = Arc::new(CompletionCounter::new(3));
        let releaser = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..3 {
                    thread::sleep(Duration::from_millis(5));
                    counter.count_down();
                }
            })
        };
        assert_eq!(
            counter.wait(None, Duration::from_secs(10), || false),
            WaitOutcome::Completed
        );
        releaser.join().unwrap();
    }
}
