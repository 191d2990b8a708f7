use crate::buffered_reader::BufferedReader;
use crate::error::Error;
use crate::record::Record;
#[cfg(test)]
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// The read-only half of a connection's transport. Owned exclusively by the reader task; never
/// shared, so it needs no lock.
enum ReadHalf {
    Tcp(TcpStream),
    Unix(UnixStream),
    #[cfg(test)]
    Test(Arc<Mutex<VecDeque<u8>>>),
}

impl Read for ReadHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadHalf::Tcp(s) => s.read(buf),
            ReadHalf::Unix(s) => s.read(buf),
            #[cfg(test)]
            ReadHalf::Test(q) => q.lock().unwrap().read(buf),
        }
    }
}

enum WriteSide {
    Tcp(TcpStream),
    Unix(UnixStream),
    #[cfg(test)]
    Test(Arc<Mutex<VecDeque<u8>>>),
}

impl Write for WriteSide {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriteSide::Tcp(s) => s.write(buf),
            WriteSide::Unix(s) => s.write(buf),
            #[cfg(test)]
            WriteSide::Test(q) => q.lock().unwrap().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            WriteSide::Tcp(s) => s.flush(),
            WriteSide::Unix(s) => s.flush(),
            #[cfg(test)]
            WriteSide::Test(q) => q.lock().unwrap().flush(),
        }
    }
}

/// The write half of a connection's transport, cheaply cloneable and internally locked.
///
/// Every handler task that wants to emit a record for a connection holds one of these. Cloning
/// it does not clone the underlying socket — all clones serialize through the same mutex, which
/// is this crate's write-serialization guarantee across concurrently multiplexed requests.
#[derive(Clone)]
pub struct WriteHandle(Arc<Mutex<WriteSide>>);

impl WriteHandle {
    /// Writes `record` for `request_id` (0 for management records).
    ///
    /// If the record's encoded content exceeds 65,535 bytes, and its type is one of the
    /// byte-stream types (`Params`, `Stdin`, `Data`, `Stdout`, `Stderr`), it is split into as
    /// many back-to-back packets as needed, preserving order; an empty record produces exactly
    /// one empty packet, which is how those types signal end-of-stream. A non-stream record
    /// (`BeginRequest`, `EndRequest`, `GetValues`, `GetValuesResult`, `UnknownType`,
    /// `AbortRequest`) whose body exceeds 65,535 bytes can never be split meaningfully, so it is
    /// rejected with a value error instead.
    pub fn write_record(&self, request_id: u16, record: &Record) -> Result<(), Error> {
        let mut payload = vec![];
        record.write_bytes(&mut payload).map_err(Error::Io)?;

        if payload.len() > u16::MAX as usize && !Record::is_stream_type(record.type_id()) {
            return Err(Error::Value(format!(
                "record type {} produced a {}-byte body, which exceeds the single-record limit of 65535 bytes",
                record.type_id(),
                payload.len()
            )));
        }

        let mut side = self.0.lock().unwrap();

        if payload.is_empty() {
            return write_packet(&mut side, record.type_id(), request_id, &[]).map_err(Error::Io);
        }

        for chunk in payload.chunks(u16::MAX as usize) {
            write_packet(&mut side, record.type_id(), request_id, chunk).map_err(Error::Io)?;
        }

        Ok(())
    }
}

fn write_packet(
    writer: &mut WriteSide,
    type_id: u8,
    request_id: u16,
    payload: &[u8],
) -> Result<(), io::Error> {
    let unpadded_len = 8 + payload.len();
    let padded_len = unpadded_len.div_ceil(8) * 8;
    let padding = (padded_len - unpadded_len) as u8;

    writer.write_all(&[1, type_id])?;
    writer.write_all(&request_id.to_be_bytes())?;
    writer.write_all(&(payload.len() as u16).to_be_bytes())?;
    writer.write_all(&[padding, 0])?;
    writer.write_all(payload)?;
    writer.write_all(&vec![0u8; padding as usize])?;
    writer.flush()
}

/// A single FastCGI connection: a reader half owned by this struct, and a write handle that can
/// be cloned out to every handler task spawned for requests on this connection.
pub struct Connection {
    reader: BufferedReader<ReadHalf>,
    writer: WriteHandle,
}

impl Connection {
    pub fn writer(&self) -> WriteHandle {
        self.writer.clone()
    }

    #[cfg(test)]
    pub fn test() -> Self {
        let buf = Arc::new(Mutex::new(VecDeque::new()));
        Connection {
            reader: BufferedReader::new(ReadHalf::Test(buf.clone()), DEFAULT_BUFFER_SIZE),
            writer: WriteHandle(Arc::new(Mutex::new(WriteSide::Test(buf)))),
        }
    }

    pub fn from_tcp(stream: TcpStream, buffer_size: usize) -> Result<Self, io::Error> {
        let write_half = stream.try_clone()?;
        Ok(Connection {
            reader: BufferedReader::new(ReadHalf::Tcp(stream), buffer_size),
            writer: WriteHandle(Arc::new(Mutex::new(WriteSide::Tcp(write_half)))),
        })
    }

    pub fn from_unix(stream: UnixStream, buffer_size: usize) -> Result<Self, io::Error> {
        let write_half = stream.try_clone()?;
        Ok(Connection {
            reader: BufferedReader::new(ReadHalf::Unix(stream), buffer_size),
            writer: WriteHandle(Arc::new(Mutex::new(WriteSide::Unix(write_half)))),
        })
    }

    /// Reads the next complete wire record. Each FastCGI record is fully self-delimited by its
    /// header's content-length field, so unlike `Connection`'s write side, reading never needs
    /// to guess at application-level boundaries: a record is a record. Returns `Ok(None)` on a
    /// clean peer shutdown (no bytes of a new record were seen).
    pub fn read_record(&mut self) -> Result<Option<(u16, Record)>, Error> {
        let Some(header) = self.reader.read_exact(8)? else {
            return Ok(None);
        };

        let [version, type_id, req_id_1, req_id_0, length_1, length_0, padding_length, _] =
            header[..].try_into().unwrap();

        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }

        let request_id = u16::from_be_bytes([req_id_1, req_id_0]);
        let length = u16::from_be_bytes([length_1, length_0]);

        let content = self
            .reader
            .read_exact(length as usize)?
            .ok_or(Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)))?;
        self.reader
            .read_exact(padding_length as usize)?
            .ok_or(Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)))?;

        let record = Record::from_bytes(type_id, request_id, content)?;
        Ok(Some((request_id, record)))
    }

    pub fn write_record(&self, request_id: u16, record: &Record) -> Result<(), Error> {
        self.writer.write_record(request_id, record)
    }
}


#[cfg(test)]
mod stream_parsing_tests {
    use super::*;
    use crate::record::*;
    use assert_matches::assert_matches;

    #[test]
    fn large_payload_is_split_into_multiple_records_on_write() {
        let mut connection = Connection::test();
        let payload_length = u16::MAX as usize * 3 + 17;
        let payload = b"A".repeat(payload_length);

        connection
            .write_record(1, &Record::from(Stdout::new(payload.clone())))
            .unwrap();

        // Each packet is capped at 65,535 bytes of content, so this had to become 4 records on
        // the wire. The caller sees them as 4 separate reads, each carrying a fragment.
        let mut received = Vec::new();
        for _ in 0..4 {
            let (id, record) = connection.read_record().unwrap().unwrap();
            assert_eq!(id, 1);
            match record {
                Record::Stdout(s) => received.extend(s.content()),
                other => panic!("unexpected record: {other:?}"),
            }
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn clean_shutdown_before_any_record_is_not_an_error() {
        let mut connection = Connection::test();
        let result = connection.read_record().unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn unsupported_version_is_a_protocol_error() {
        let mut connection = Connection::test();
        connection
            .write_record(1, &Record::from(Stdout::new(b"hi".to_vec())))
            .unwrap();

        // Corrupt the version byte directly on the shared transport buffer.
        if let WriteSide::Test(buf) = &*connection.writer.0.lock().unwrap() {
            buf.lock().unwrap()[0] = 2;
        }

        let result = connection.read_record();
        assert_matches!(result, Err(Error::UnsupportedVersion(2)));
    }
}
