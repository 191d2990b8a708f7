use std::io;

/// Errors produced while decoding or encoding the FastCGI wire protocol, and
/// while driving a connection.
///
/// Variants map onto the error taxonomy this server follows: protocol errors
/// are fatal to the connection they occur on, value errors are returned
/// directly to the caller that attempted an invalid operation, and I/O
/// errors wrap the underlying transport failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer sent something other than FastCGI version 1.
    #[error("unsupported FastCGI version: {0}")]
    UnsupportedVersion(u8),

    /// A record referenced a request id that has no matching `Request`.
    #[error("record referenced unknown request id {0}")]
    UnknownRequestId(u16),

    /// A connection sent a record type this server doesn't implement.
    #[error("unknown record type: {0}")]
    UnknownRecordType(u8),

    /// A `BEGIN_REQUEST` named a role this server does not support.
    #[error("unsupported FastCGI role: {0}")]
    UnsupportedRole(u16),

    /// A `END_REQUEST` body named a protocol status this server doesn't know.
    #[error("unsupported FastCGI protocol status: {0}")]
    UnsupportedProtocolStatus(u8),

    /// A record payload didn't decode into the shape its type expects.
    #[error("malformed {0} record payload")]
    MalformedRecordPayload(&'static str),

    /// A record type arrived in a context the protocol doesn't allow it in, e.g. a management
    /// record on a live request id, or a per-request record on request id 0.
    #[error("record type {0} is not valid in this context")]
    UnexpectedRecordType(u8),

    /// A name or value passed to the packed name/value codec would not fit
    /// in the 31-bit length field, or a record body exceeded the maximum a
    /// single non-stream record can carry.
    #[error("value error: {0}")]
    Value(String),

    /// The connection (or one of its streams) was used in a way the FastCGI
    /// state machine forbids: feeding an `InputStream` after EOF, writing to
    /// a closed `OutputStream`, etc.
    #[error("usage error: {0}")]
    Usage(&'static str),

    /// The underlying socket failed, or the peer went away mid-record.
    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
