use crate::error::Error;
use std::collections::VecDeque;
use std::io::{self, Read};

/// Reads exact-length chunks out of a byte source that only promises "up to N bytes per call".
///
/// Underlying reads are rounded up to at least `buffer_size` bytes so a source is not invoked
/// once per byte; left-over bytes are held for the next call. Callers need to tell a genuinely
/// short read (the peer died mid-record, a protocol error) apart from a clean shutdown (the peer
/// is simply done sending anything) — `read_exact` returns `Ok(None)` only for the latter: no
/// bytes at all were available for a read that hadn't yet consumed anything.
pub struct BufferedReader<R> {
    inner: R,
    buffer_size: usize,
    pending: VecDeque<u8>,
}

impl<R: Read> BufferedReader<R> {
    pub fn new(inner: R, buffer_size: usize) -> Self {
        Self {
            inner,
            buffer_size: buffer_size.max(1),
            pending: VecDeque::new(),
        }
    }

    fn fill(&mut self, want: usize) -> io::Result<usize> {
        let have = self.pending.len();
        if have >= want {
            return Ok(usize::MAX);
        }
        let needed = want - have;
        let to_read = needed.div_ceil(self.buffer_size) * self.buffer_size;

        let mut scratch = vec![0u8; to_read];
        let n = self.inner.read(&mut scratch)?;
        self.pending.extend(&scratch[..n]);
        Ok(n)
    }

    /// Reads exactly `n` bytes, blocking until they are all available.
    ///
    /// Returns `Ok(None)` if the peer closed the connection before sending any byte of this
    /// read (a clean shutdown). Returns `Err` if the connection failed, or closed after
    /// delivering some but not all of the requested bytes (a truncated, malformed stream).
    pub fn read_exact(&mut self, n: usize) -> Result<Option<Vec<u8>>, Error> {
        if n == 0 {
            return Ok(Some(Vec::new()));
        }

        let mut read_anything = false;
        while self.pending.len() < n {
            let got = self.fill(n).map_err(Error::Io)?;
            if got == 0 {
                if !read_anything && self.pending.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)));
            }
            if got != usize::MAX {
                read_anything = true;
            }
        }

        Ok(Some(self.pending.drain(..n).collect()))
    }
}
