use crate::record::{Pairs, Role, Stderr, Stdout};
use crate::stream::{InputStream, OutputStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single in-flight FastCGI request, multiplexed on some connection.
///
/// Constructed by the connection handler once a request's environment is fully known; handed to
/// the application's request-handler callback. Reading `stdin`/`data` blocks until the peer has
/// sent that stream's end-of-stream marker; writing `stdout`/`stderr` emits records immediately.
pub struct Request {
    id: u16,
    role: Role,
    environ: Pairs,
    stdin: InputStream,
    data: Option<InputStream>,
    stdout: OutputStream,
    stderr: OutputStream,
    keep_conn: bool,
    aborted: Arc<AtomicBool>,
}

impl Request {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u16,
        role: Role,
        environ: Pairs,
        stdin: InputStream,
        data: Option<InputStream>,
        stdout: OutputStream,
        stderr: OutputStream,
        keep_conn: bool,
        aborted: Arc<AtomicBool>,
    ) -> Self {
        Request {
            id,
            role,
            environ,
            stdin,
            data,
            stdout,
            stderr,
            keep_conn,
            aborted,
        }
    }

    /// The request id this request was multiplexed under.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// The role the web server asked this request to be served under.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The name/value pairs sent in the request's `FCGI_PARAMS` stream.
    pub fn environ(&self) -> &Pairs {
        &self.environ
    }

    pub fn environ_var(&self, name: &[u8]) -> Option<&[u8]> {
        self.environ.get(name).map(Vec::as_slice)
    }

    /// Whether the web server asked to keep this connection open after this request completes.
    pub fn keep_conn(&self) -> bool {
        self.keep_conn
    }

    pub fn stdin(&self) -> &InputStream {
        &self.stdin
    }

    /// The secondary input stream, present only for the `FILTER` role.
    pub fn data(&self) -> Option<&InputStream> {
        self.data.as_ref()
    }

    pub fn stdout(&self) -> &OutputStream {
        &self.stdout
    }

    pub fn stderr(&self) -> &OutputStream {
        &self.stderr
    }

    /// Whether the peer has sent `ABORT_REQUEST` for this request.
    ///
    /// An `ABORT_REQUEST` arriving after the handler has been spawned cannot preempt an OS
    /// thread the way a cooperatively-scheduled green thread could. Handlers that run long
    /// enough to care about cancellation should poll this between units of work and return
    /// early when it flips to `true`; finalization (closing `stdout`/`stderr`, emitting
    /// `END_REQUEST`) still happens once the handler returns, aborted or not.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

pub(crate) fn stdout_wrap(bytes: Vec<u8>) -> crate::record::Record {
    crate::record::Record::from(Stdout::new(bytes))
}

pub(crate) fn stderr_wrap(bytes: Vec<u8>) -> crate::record::Record {
    crate::record::Record::from(Stderr::new(bytes))
}
