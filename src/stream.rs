use crate::connection::WriteHandle;
use crate::error::Error;
use crate::record::Record;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Condvar, Mutex};

enum Storage {
    Memory(Vec<u8>),
    Landed(File),
}

struct Inner {
    storage: Storage,
    len: u64,
    eof: bool,
}

/// The producer/consumer byte stream backing `stdin` and `data`.
///
/// A FastCGI client feeds bytes into this stream (and eventually an empty chunk marking EOF) as
/// `FCGI_STDIN`/`FCGI_DATA` records arrive. The request handler consumes it as a blocking
/// `Read`: every read call blocks until EOF has been fed, so the handler never observes a short
/// read followed by more data — it is handed the whole body at once, whatever the wire chunking
/// looked like.
///
/// To keep memory bounded for large uploads, content beyond `max_mem` bytes is copied out to a
/// temporary file ("landed") the first time the threshold is crossed; further feeds are appended
/// to that file. Consumers never observe the difference.
#[derive(Clone)]
pub struct InputStream {
    inner: Arc<(Mutex<Inner>, Condvar)>,
    max_mem: usize,
}

impl InputStream {
    pub fn new(max_mem: usize) -> Self {
        InputStream {
            inner: Arc::new((
                Mutex::new(Inner {
                    storage: Storage::Memory(Vec::new()),
                    len: 0,
                    eof: false,
                }),
                Condvar::new(),
            )),
            max_mem,
        }
    }

    /// Appends `bytes` to the stream. Feeding an empty slice marks end-of-stream and wakes any
    /// blocked reader. Feeding again after EOF is a usage error.
    pub fn feed(&self, bytes: &[u8]) -> Result<(), Error> {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();

        if inner.eof {
            return Err(Error::Usage("fed InputStream bytes after EOF"));
        }

        if bytes.is_empty() {
            inner.eof = true;
            cvar.notify_all();
            return Ok(());
        }

        if inner.len as usize + bytes.len() > self.max_mem {
            self.land(&mut inner)?;
        }

        match &mut inner.storage {
            Storage::Memory(buf) => buf.extend_from_slice(bytes),
            Storage::Landed(file) => {
                file.write_all(bytes)?;
            }
        }
        inner.len += bytes.len() as u64;

        Ok(())
    }

    fn land(&self, inner: &mut Inner) -> Result<(), Error> {
        if let Storage::Memory(buf) = &inner.storage {
            let mut file = tempfile::tempfile()?;
            file.write_all(buf)?;
            inner.storage = Storage::Landed(file);
        }
        Ok(())
    }

    fn wait_for_eof<'a>(
        &self,
        mut inner: std::sync::MutexGuard<'a, Inner>,
    ) -> std::sync::MutexGuard<'a, Inner> {
        let (_, cvar) = &*self.inner;
        while !inner.eof {
            inner = cvar.wait(inner).unwrap();
        }
        inner
    }

    /// Blocks until EOF, then returns the entire body.
    pub fn read_all(&self) -> Result<Vec<u8>, Error> {
        let (lock, _) = &*self.inner;
        let inner = lock.lock().unwrap();
        let mut inner = self.wait_for_eof(inner);

        let bytes = match &mut inner.storage {
            Storage::Memory(buf) => buf.clone(),
            Storage::Landed(file) => {
                let mut buf = Vec::new();
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut buf)?;
                buf
            }
        };

        Ok(bytes)
    }

    /// Blocks until EOF, then returns a fresh reader over the whole body.
    pub fn reader(&self) -> Result<Box<dyn Read + Send>, Error> {
        let (lock, _) = &*self.inner;
        let inner = lock.lock().unwrap();
        let mut inner = self.wait_for_eof(inner);

        match &mut inner.storage {
            Storage::Memory(buf) => Ok(Box::new(io::Cursor::new(buf.clone()))),
            Storage::Landed(file) => {
                file.seek(SeekFrom::Start(0))?;
                Ok(Box::new(file.try_clone()?))
            }
        }
    }

    /// Blocks until EOF, then splits the body into lines (without the trailing newline).
    pub fn read_lines(&self) -> Result<Vec<Vec<u8>>, Error> {
        let bytes = self.read_all()?;
        Ok(bytes
            .split(|&b| b == b'\n')
            .map(|l| l.to_vec())
            .collect())
    }
}

/// The consumer-facing byte stream backing `stdout` and `stderr`.
///
/// `write` chunks arbitrarily large payloads into records of at most 65,535 bytes each, emitted
/// immediately (no internal buffering beyond what a single record can carry). `close` is
/// idempotent: calling it more than once sends exactly one end-of-stream record.
#[derive(Clone)]
pub struct OutputStream {
    writer: WriteHandle,
    request_id: u16,
    wrap: fn(Vec<u8>) -> Record,
    closed: Arc<Mutex<bool>>,
}

impl OutputStream {
    pub(crate) fn new(writer: WriteHandle, request_id: u16, wrap: fn(Vec<u8>) -> Record) -> Self {
        OutputStream {
            writer,
            request_id,
            wrap,
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        if *self.closed.lock().unwrap() {
            return Err(Error::Usage("write on a closed OutputStream"));
        }

        if bytes.is_empty() {
            return Ok(());
        }

        self.writer
            .write_record(self.request_id, &(self.wrap)(bytes.to_vec()))
    }

    /// Writes each item from `lines`, joining none of them: every item becomes its own
    /// `write` call (and is itself chunked if it exceeds the record cap).
    pub fn write_lines<I>(&self, lines: I) -> Result<(), Error>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        for line in lines {
            self.write(line.as_ref())?;
        }
        Ok(())
    }

    /// Idempotent: only the first call emits the end-of-stream record.
    pub fn close(&self) -> Result<(), Error> {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Ok(());
        }
        *closed = true;
        self.writer
            .write_record(self.request_id, &(self.wrap)(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::record::Stdout;
    use std::thread;

    #[test]
    fn feed_then_read_all_returns_concatenation() {
        let stream = InputStream::new(1024);
        stream.feed(b"HELLO").unwrap();
        stream.feed(b"WORLD").unwrap();
        stream.feed(b"").unwrap();
        assert_eq!(stream.read_all().unwrap(), b"HELLOWORLD");
    }

    #[test]
    fn read_blocks_until_eof() {
        let stream = Arc::new(InputStream::new(1024));
        let reader_stream = stream.clone();

        let handle = thread::spawn(move || reader_stream.read_all().unwrap());

        thread::sleep(std::time::Duration::from_millis(20));
        stream.feed(b"partial").unwrap();
        thread::sleep(std::time::Duration::from_millis(20));
        stream.feed(b"").unwrap();

        assert_eq!(handle.join().unwrap(), b"partial");
    }

    #[test]
    fn feeding_after_eof_is_a_usage_error() {
        let stream = InputStream::new(1024);
        stream.feed(b"").unwrap();
        assert!(matches!(stream.feed(b"more"), Err(Error::Usage(_))));
    }

    #[test]
    fn lands_to_disk_once_max_mem_exceeded() {
        let stream = InputStream::new(4);
        stream.feed(b"HELLO").unwrap();
        stream.feed(b"WORLD").unwrap();
        stream.feed(b"").unwrap();
        assert_eq!(stream.read_all().unwrap(), b"HELLOWORLD");
    }

    #[test]
    fn close_is_idempotent() {
        let connection = Connection::test();
        let stream = OutputStream::new(connection.writer(), 1, |b| Record::from(Stdout::new(b)));
        stream.close().unwrap();
        stream.close().unwrap();

        let mut connection = connection;
        let (_, record) = connection.read_record().unwrap().unwrap();
        assert_eq!(record, Record::from(Stdout::new(vec![])));
        // Only one EOF record should have been emitted.
        assert!(connection.read_record().unwrap().is_none());
    }

    #[test]
    fn write_after_close_fails() {
        let connection = Connection::test();
        let stream = OutputStream::new(connection.writer(), 1, |b| Record::from(Stdout::new(b)));
        stream.close().unwrap();
        assert!(matches!(stream.write(b"late"), Err(Error::Usage(_))));
    }

    #[test]
    fn empty_write_after_close_still_fails() {
        let connection = Connection::test();
        let stream = OutputStream::new(connection.writer(), 1, |b| Record::from(Stdout::new(b)));
        stream.close().unwrap();
        assert!(matches!(stream.write(b""), Err(Error::Usage(_))));
    }

    #[test]
    fn large_write_is_split_across_records() {
        let connection = Connection::test();
        let stream = OutputStream::new(connection.writer(), 1, |b| Record::from(Stdout::new(b)));
        let payload = vec![b'A'; u16::MAX as usize + 10];
        stream.write(&payload).unwrap();
        stream.close().unwrap();

        let mut connection = connection;
        let mut received = Vec::new();
        loop {
            let (_, record) = connection.read_record().unwrap().unwrap();
            match record {
                Record::Stdout(s) if s.content().is_empty() => break,
                Record::Stdout(s) => received.extend(s.content()),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(received, payload);
    }
}
