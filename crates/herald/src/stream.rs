//! Bounded-memory mark/replay stream.
//!
//! [`UploadStreamGuard`] wraps a byte source so that an HTTP upload which
//! fails part-way can rewind to the last mark and send the same bytes again,
//! without holding more than `capacity` bytes in memory.
//!
//! ```
//! use std::io::Read;
//! use herald::stream::UploadStreamGuard;
//!
//! let mut guard = UploadStreamGuard::with_capacity(&b"hello world"[..], 64);
//! let mut first = String::new();
//! guard.read_to_string(&mut first)?;
//! guard.reset()?;
//! let mut second = String::new();
//! guard.read_to_string(&mut second)?;
//! assert_eq!(first, second);
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! Once more than `capacity` bytes have been read since the buffer was last
//! rebased, buffering is abandoned and [`UploadStreamGuard::reset`] fails
//! until the next [`UploadStreamGuard::mark`].

use std::io::{self, Read};
use std::sync::{Arc, Mutex};

/// Default replay capacity: 128 KiB.
pub const DEFAULT_CAPACITY: usize = 128 * 1024;

pub struct UploadStreamGuard<R> {
    inner: R,
    capacity: usize,
    /// Bytes read since the buffer was rebased.
    buffer: Vec<u8>,
    /// Index into `buffer` of the next byte to serve.
    cursor: usize,
    /// Index into `buffer` of the mark.
    mark: usize,
    overflowed: bool,
    position: u64,
    mark_position: u64,
}

impl<R: Read> UploadStreamGuard<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    /// A fresh guard is marked at offset zero.
    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            buffer: Vec::new(),
            cursor: 0,
            mark: 0,
            overflowed: false,
            position: 0,
            mark_position: 0,
        }
    }

    /// Set the replay point at the current position.
    ///
    /// If buffering was abandoned, the buffer is rebased here and replay
    /// becomes possible again.
    pub fn mark(&mut self) {
        if self.overflowed {
            self.buffer.clear();
            self.cursor = 0;
            self.overflowed = false;
        }
        self.mark = self.cursor;
        self.mark_position = self.position;
    }

    /// Rewind to the last mark.
    pub fn reset(&mut self) -> io::Result<()> {
        if self.overflowed {
            return Err(io::Error::other(format!(
                "stream cannot be replayed: more than {} bytes read since offset {}",
                self.capacity, self.mark_position
            )));
        }
        self.cursor = self.mark;
        self.position = self.mark_position;
        Ok(())
    }

    /// Logical offset of the next byte `read` will return.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: Read> Read for UploadStreamGuard<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.cursor < self.buffer.len() {
            let n = buf.len().min(self.buffer.len() - self.cursor);
            buf[..n].copy_from_slice(&self.buffer[self.cursor..self.cursor + n]);
            self.cursor += n;
            self.position += n as u64;
            return Ok(n);
        }

        let n = self.inner.read(buf)?;
        if n > 0 && !self.overflowed {
            if self.buffer.len() + n <= self.capacity {
                self.buffer.extend_from_slice(&buf[..n]);
                self.cursor = self.buffer.len();
            } else {
                self.overflowed = true;
                self.buffer = Vec::new();
                self.cursor = 0;
                self.mark = 0;
            }
        }
        self.position += n as u64;
        Ok(n)
    }
}

/// Cloneable handle to a guard, for request bodies that take ownership of
/// their reader while the caller still needs to reset between attempts.
pub struct SharedGuard<R> {
    inner: Arc<Mutex<UploadStreamGuard<R>>>,
}

impl<R> Clone for SharedGuard<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Read> SharedGuard<R> {
    pub fn new(guard: UploadStreamGuard<R>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(guard)),
        }
    }

    pub fn reset(&self) -> io::Result<()> {
        self.lock()?.reset()
    }

    pub fn position(&self) -> io::Result<u64> {
        Ok(self.lock()?.position())
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, UploadStreamGuard<R>>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("upload stream lock poisoned"))
    }
}

impl<R: Read> Read for SharedGuard<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock()?.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn read_exact_vec<R: Read>(r: &mut R, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        r.read_exact(&mut out).expect("read");
        out
    }

    #[test]
    fn reset_without_mark_rewinds_to_start() {
        let source = data(100);
        let mut guard = UploadStreamGuard::with_capacity(&source[..], 128);
        let first = read_exact_vec(&mut guard, 60);
        guard.reset().expect("reset");
        assert_eq!(guard.position(), 0);
        assert_eq!(read_exact_vec(&mut guard, 60), first);
    }

    #[test]
    fn replay_then_continue_live() {
        let source = data(50);
        let mut guard = UploadStreamGuard::with_capacity(&source[..], 64);
        read_exact_vec(&mut guard, 20);
        guard.reset().expect("reset");

        let mut all = Vec::new();
        guard.read_to_end(&mut all).expect("read");
        assert_eq!(all, source);
    }

    #[test]
    fn overflow_makes_reset_fail() {
        let source = data(300);
        let mut guard = UploadStreamGuard::with_capacity(&source[..], 100);
        read_exact_vec(&mut guard, 150);

        let err = guard.reset().expect_err("must fail");
        assert!(err.to_string().contains("cannot be replayed"));
    }

    #[test]
    fn mark_after_overflow_rebases() {
        let source = data(300);
        let mut guard = UploadStreamGuard::with_capacity(&source[..], 100);
        read_exact_vec(&mut guard, 150);
        guard.mark();

        let tail = read_exact_vec(&mut guard, 80);
        guard.reset().expect("reset");
        assert_eq!(guard.position(), 150);
        assert_eq!(read_exact_vec(&mut guard, 80), tail);
        assert_eq!(tail, source[150..230]);
    }

    #[test]
    fn mark_during_replay_moves_replay_point() {
        let source = data(40);
        let mut guard = UploadStreamGuard::with_capacity(&source[..], 64);
        read_exact_vec(&mut guard, 30);
        guard.reset().expect("reset");
        read_exact_vec(&mut guard, 10);
        guard.mark();

        let rest = read_exact_vec(&mut guard, 30);
        guard.reset().expect("reset");
        assert_eq!(read_exact_vec(&mut guard, 30), rest);
        assert_eq!(rest, source[10..40]);
    }

    #[test]
    fn shared_guard_resets_through_any_clone() {
        let shared = SharedGuard::new(UploadStreamGuard::with_capacity(
            std::io::Cursor::new(data(32)),
            64,
        ));
        let mut reader = shared.clone();
        let first = read_exact_vec(&mut reader, 32);
        assert_eq!(shared.position().expect("position"), 32);

        shared.reset().expect("reset");
        let mut again = shared.clone();
        assert_eq!(read_exact_vec(&mut again, 32), first);
    }

    proptest! {
        #[test]
        fn mark_read_reset_replays_same_bytes(
            capacity in 1usize..512,
            k in 0usize..512,
            m in 1usize..512,
        ) {
            prop_assume!(k <= capacity);
            let source = data(k + m + 16);
            let mut guard = UploadStreamGuard::with_capacity(&source[..], capacity);

            read_exact_vec(&mut guard, k);
            guard.mark();
            let first = read_exact_vec(&mut guard, m);

            if k + m > capacity {
                prop_assert!(guard.reset().is_err());
            } else {
                prop_assert!(guard.reset().is_ok());
                prop_assert_eq!(guard.position(), k as u64);
                let second = read_exact_vec(&mut guard, m);
                prop_assert_eq!(first, second);
            }
        }
    }
}
