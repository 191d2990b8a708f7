//! Listener configuration and the worker supervisor.
//!
//! [`ServerSpec`] is the builder: pick a role, tune `max_conns`/`buffer_size`/`backlog`, point it
//! at a TCP address or a local-socket path, and `start()` it with a request handler. With
//! `num_workers == 1` (the default) the server runs in-process on a background thread, stopped by
//! waking a blocked `mio::Poll` with a `Waker`. With `num_workers > 1` the calling process forks
//! that many children, each independently accepting off the same listening socket, and becomes a
//! supervisor that respawns children that die and reaps them on shutdown.

use crate::connection_handler::HandlerConfig;
use crate::listener::{self, BoundListener, LoopExit};
use crate::record::{Pairs, Role};
use crate::request::Request;
use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{
    bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrIn6,
};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where a server listens: a TCP address, or a filesystem path for a Unix-domain local socket.
#[derive(Clone, Debug)]
pub enum Endpoint {
    Tcp(SocketAddr),
    LocalSocket(PathBuf),
}

impl Endpoint {
    pub fn tcp(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        Ok(Endpoint::Tcp(addr))
    }

    pub fn local_socket(path: impl Into<PathBuf>) -> Self {
        Endpoint::LocalSocket(path.into())
    }
}

/// Configuration for a FastCGI server: which role it serves, how many connections/workers it
/// fans out to, and the wire-level tuning knobs from `spec.md` §6.
#[derive(Clone)]
pub struct ServerSpec {
    role: Role,
    max_conns: usize,
    num_workers: usize,
    buffer_size: usize,
    backlog: Option<u32>,
    socket_mode: Option<u32>,
    max_input_mem: usize,
    shutdown_grace: Duration,
}

impl ServerSpec {
    /// Creates a new spec for a server serving `role`, with the same defaults
    /// `gevent_fastcgi.server.FastCGIServer` ships: 1024 max connections, a single worker
    /// process, 1KiB read-buffer granularity.
    pub fn new(role: Role) -> Self {
        ServerSpec {
            role,
            max_conns: 1024,
            num_workers: 1,
            buffer_size: 1024,
            backlog: None,
            socket_mode: None,
            max_input_mem: 1024 * 1024,
            shutdown_grace: Duration::from_secs(2),
        }
    }

    /// Caps concurrently-handled connections per worker process; advertised to the peer as
    /// `FCGI_MAX_CONNS`. Beyond this many simultaneously active connections, new ones queue
    /// behind the connection-handler threadpool instead of being accepted immediately.
    pub fn max_conns(mut self, max_conns: usize) -> Self {
        self.max_conns = max_conns;
        self
    }

    /// How many worker processes to fork. `1` (the default) runs entirely in-process, no fork.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        assert!(num_workers > 0, "num_workers must be positive");
        self.num_workers = num_workers;
        self
    }

    /// Granularity of the underlying socket reads; also the `SO_RCVBUF`/`SO_SNDBUF` size set on
    /// accepted TCP connections.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Listen backlog. Defaults to `max_conns` if never called.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Filesystem mode applied to a local-socket file right after bind, under a zeroed umask.
    /// Meaningless for TCP endpoints.
    pub fn socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = Some(mode);
        self
    }

    /// Bytes an input stream (`stdin`/`data`) keeps in memory before spilling to a temp file.
    pub fn max_input_mem(mut self, bytes: usize) -> Self {
        self.max_input_mem = bytes;
        self
    }

    /// How long `stop()` waits after `SIGHUP` before escalating to `SIGKILL`, in multi-worker
    /// mode. Unused when `num_workers == 1`.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    fn capabilities(&self) -> Pairs {
        let mut caps = Pairs::new();
        caps.insert(b"FCGI_MAX_CONNS".to_vec(), self.max_conns.to_string().into_bytes());
        caps.insert(
            b"FCGI_MAX_REQS".to_vec(),
            (self.max_conns * 1024).to_string().into_bytes(),
        );
        caps.insert(b"FCGI_MPXS_CONNS".to_vec(), b"1".to_vec());
        caps
    }

    /// Binds `endpoint` and starts serving. Does not block: the server runs on background
    /// thread(s) (or process(es)), and this returns a [`ServerHandle`] to join or stop it.
    pub fn start<F>(self, endpoint: Endpoint, handler: F) -> io::Result<ServerHandle>
    where
        F: Fn(Request) + Send + Sync + 'static,
    {
        let backlog = self.backlog.unwrap_or(self.max_conns as u32);
        let (listener, socket_path) = bind(endpoint, backlog, self.socket_mode)?;
        let address = listener_address(&listener)?;

        let config = Arc::new(HandlerConfig {
            role: self.role,
            max_input_mem: self.max_input_mem,
            capabilities: self.capabilities(),
        });
        let handler: Arc<dyn Fn(Request) + Send + Sync> = Arc::new(handler);

        if self.num_workers == 1 {
            log::info!(address:? = address; "FastCGI server listening");
            let worker = listener::spawn_single(
                listener,
                config,
                handler,
                self.max_conns,
                self.buffer_size,
            )?;
            return Ok(ServerHandle {
                address,
                socket_path,
                inner: HandleInner::Single {
                    server_loop: worker.handle,
                    server_waker: worker.waker,
                    observe_shutdown: worker.observe_shutdown,
                },
            });
        }

        start_supervisor(
            listener,
            config,
            handler,
            self.max_conns,
            self.buffer_size,
            self.num_workers,
            self.shutdown_grace,
            address,
            socket_path,
        )
    }
}

fn listener_address(listener: &BoundListener) -> io::Result<SocketAddr> {
    match listener {
        BoundListener::Tcp(l) => l.local_addr(),
        // Local sockets have no meaningful SocketAddr; callers use `ServerHandle::socket_path()`.
        BoundListener::Unix(_) => Ok("0.0.0.0:0".parse().unwrap()),
    }
}

/// Binds `endpoint`, setting up the socket with an explicit `backlog` (the standard library
/// does not expose this, so the raw socket calls go through `nix`). For a local socket whose
/// path already exists, it is replaced.
fn bind(
    endpoint: Endpoint,
    backlog: u32,
    socket_mode: Option<u32>,
) -> io::Result<(BoundListener, Option<PathBuf>)> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let fd = socket(
                if addr.is_ipv6() {
                    AddressFamily::Inet6
                } else {
                    AddressFamily::Inet
                },
                SockType::Stream,
                SockFlag::empty(),
                None,
            )?;
            nix::sys::socket::setsockopt(&fd, nix::sys::socket::sockopt::ReuseAddr, &true)?;
            match addr {
                SocketAddr::V4(v4) => bind_fd(&fd, &SockaddrIn::from(v4))?,
                SocketAddr::V6(v6) => bind_fd(&fd, &SockaddrIn6::from(v6))?,
            }
            listen(&fd, Backlog::new(backlog as i32).unwrap_or(Backlog::MAXCONN))?;
            let listener = unsafe { StdTcpListener::from_raw_fd(fd.into_raw_fd()) };
            Ok((BoundListener::Tcp(listener), None))
        }
        Endpoint::LocalSocket(path) => {
            if path.exists() {
                fs::remove_file(&path)?;
            }

            let fd = socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)?;
            let addr = nix::sys::socket::UnixAddr::new(&path)?;

            let old_umask = socket_mode.map(|_| nix::sys::stat::umask(Mode::empty()));
            let bind_result = bind_fd(&fd, &addr);
            if let Some(old) = old_umask {
                nix::sys::stat::umask(old);
            }
            bind_result?;

            if let Some(mode) = socket_mode {
                fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
            }

            listen(&fd, Backlog::new(backlog as i32).unwrap_or(Backlog::MAXCONN))?;
            let listener = unsafe { StdUnixListener::from_raw_fd(fd.into_raw_fd()) };
            Ok((BoundListener::Unix(listener), Some(path)))
        }
    }
}

fn bind_fd(fd: &impl std::os::fd::AsFd, addr: &dyn nix::sys::socket::SockaddrLike) -> io::Result<()> {
    bind(fd, addr).map_err(io::Error::from)
}

/// The reason a worker's accept loop stopped.
#[derive(Debug, Default)]
pub enum ServerExitReason {
    #[default]
    Normal,
    Err(io::Error),
    Panic(String),
}

enum HandleInner {
    Single {
        server_loop: JoinHandle<LoopExit>,
        server_waker: mio::Waker,
        observe_shutdown: Receiver<()>,
    },
    Supervisor {
        supervisor_loop: JoinHandle<()>,
        shutdown: Arc<AtomicBool>,
        workers: Arc<Mutex<Vec<Pid>>>,
        grace: Duration,
    },
}

/// Handle to a running FastCGI server.
pub struct ServerHandle {
    address: SocketAddr,
    socket_path: Option<PathBuf>,
    inner: HandleInner,
}

impl ServerHandle {
    /// Blocks until the server terminates and returns why. Does not itself ask it to stop.
    pub fn join(self) -> ServerExitReason {
        match self.inner {
            HandleInner::Single { server_loop, .. } => match server_loop.join() {
                Ok(LoopExit::Normal) => ServerExitReason::Normal,
                Ok(LoopExit::Err(e)) => ServerExitReason::Err(e),
                Err(any) => ServerExitReason::Panic(panic_message(any)),
            },
            HandleInner::Supervisor { supervisor_loop, .. } => match supervisor_loop.join() {
                Ok(()) => ServerExitReason::Normal,
                Err(any) => ServerExitReason::Panic(panic_message(any)),
            },
        }
    }

    /// Stops the server. Waits for in-flight requests to finish first.
    ///
    /// In multi-worker mode, every child is sent `SIGHUP` (a graceful "stop accepting, finish
    /// in-flight work, exit" request, per the `signal(SIGHUP, self.stop)` handler each worker
    /// installs); survivors after `shutdown_grace` are sent `SIGKILL`. The local-socket file, if
    /// any, is removed exactly once, after every child is gone.
    pub fn stop(self) {
        match self.inner {
            HandleInner::Single {
                server_waker,
                observe_shutdown,
                ..
            } => {
                let Ok(()) = server_waker.wake() else {
                    return;
                };
                let _ = observe_shutdown.recv();
                self.remove_socket_file();
            }
            HandleInner::Supervisor {
                supervisor_loop,
                shutdown,
                workers,
                grace,
            } => {
                shutdown.store(true, Ordering::SeqCst);

                let pids: Vec<Pid> = workers.lock().unwrap().clone();
                for pid in &pids {
                    let _ = kill(*pid, Signal::SIGHUP);
                }

                thread::sleep(grace);

                let survivors: Vec<Pid> = workers.lock().unwrap().clone();
                for pid in &survivors {
                    let _ = kill(*pid, Signal::SIGKILL);
                }
                for pid in &survivors {
                    let _ = waitpid(*pid, None);
                }

                let _ = supervisor_loop.join();
                self.remove_socket_file();
            }
        }
    }

    fn remove_socket_file(&self) {
        if let Some(path) = &self.socket_path {
            if let Err(e) = fs::remove_file(path) {
                log::warn!(error:err = e, path:? = path; "failed to remove local-socket file");
            }
        }
    }

    /// The address this server is listening on. For a local-socket server this is a placeholder;
    /// use [`ServerHandle::socket_path`] instead.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::connection::Connection;
    use crate::record::*;
    use std::io::Write as _;
    use std::net::{Shutdown, TcpStream};

    fn start_test_server<F>(role: Role, max_conns: usize, handler: F) -> ServerHandle
    where
        F: Fn(Request) + Send + Sync + 'static,
    {
        let _ = env_logger::try_init();
        ServerSpec::new(role)
            .max_conns(max_conns)
            .start(Endpoint::tcp("127.0.0.1:0").unwrap(), handler)
            .unwrap()
    }

    /// Connects to `handle` and returns both the raw socket (so the test can half-close the
    /// write side, the way a FastCGI web server signals "no more input") and a `Connection`
    /// wrapping a clone of it for framed record I/O.
    fn connect(handle: &ServerHandle) -> (TcpStream, Connection) {
        let stream = TcpStream::connect(handle.address()).unwrap();
        let conn = Connection::from_tcp(stream.try_clone().unwrap(), 1024).unwrap();
        (stream, conn)
    }

    fn get_request_environ() -> Pairs {
        let mut environ = Pairs::new();
        environ.insert(b"REQUEST_METHOD".to_vec(), b"GET".to_vec());
        environ
    }

    #[test]
    fn get_values_query_answers_known_capabilities_only() {
        let handle = start_test_server(Role::Responder, 4, |_req| {});
        let (stream, mut conn) = connect(&handle);

        let query = GetValues::default()
            .add("FCGI_MAX_CONNS")
            .add("FCGI_MAX_REQS")
            .add("FCGI_MPXS_CONNS")
            .add("NOT_A_REAL_CAPABILITY");
        conn.write_record(0, &Record::from(query)).unwrap();
        stream.shutdown(Shutdown::Write).unwrap();

        let (id, record) = conn.read_record().unwrap().unwrap();
        assert_eq!(id, 0);
        let expected = GetValuesResult::default()
            .add("FCGI_MAX_CONNS", "4")
            .add("FCGI_MAX_REQS", "4096")
            .add("FCGI_MPXS_CONNS", "1");
        assert_eq!(record, Record::from(expected));

        assert!(conn.read_record().unwrap().is_none());
        handle.stop();
    }

    #[test]
    fn single_responder_echoes_stdin_to_stdout() {
        let handle = start_test_server(Role::Responder, 4, |req| {
            let body = req.stdin().read_all().unwrap();
            req.stdout().write(&body).unwrap();
        });
        let (stream, mut conn) = connect(&handle);

        let body: Vec<u8> = (0..=255u8).collect();
        conn.write_record(1, &Record::from(BeginRequest::new(Role::Responder, false)))
            .unwrap();
        conn.write_record(1, &Record::from(Params::from_pairs(&get_request_environ())))
            .unwrap();
        conn.write_record(1, &Record::from(Params::default())).unwrap();
        conn.write_record(1, &Record::from(Stdin::new(body.clone())))
            .unwrap();
        conn.write_record(1, &Record::from(Stdin::new(vec![]))).unwrap();

        let mut received_stdout = Vec::new();
        let mut saw_stdout_eof = false;
        let mut saw_stderr_eof = false;
        let end;
        loop {
            let (id, record) = conn.read_record().unwrap().expect("connection closed early");
            assert_eq!(id, 1);
            match record {
                Record::Stdout(s) if s.content().is_empty() => saw_stdout_eof = true,
                Record::Stdout(s) => received_stdout.extend(s.content()),
                Record::Stderr(s) if s.content().is_empty() => saw_stderr_eof = true,
                Record::EndRequest(e) => {
                    end = e;
                    break;
                }
                other => panic!("unexpected record: {other:?}"),
            }
        }

        assert_eq!(received_stdout, body);
        assert!(saw_stdout_eof);
        assert!(saw_stderr_eof);
        assert_eq!(end, EndRequest::new(0, ProtocolStatus::RequestComplete));

        // keep_conn was false, so the server closes the connection on its own.
        assert!(conn.read_record().unwrap().is_none());
        drop(stream);
        handle.stop();
    }

    #[test]
    fn multiplexed_requests_both_complete_independently() {
        let handle = start_test_server(Role::Responder, 4, |_req| {});
        let (stream, mut conn) = connect(&handle);
        let params = Record::from(Params::from_pairs(&get_request_environ()));

        conn.write_record(8, &Record::from(BeginRequest::new(Role::Responder, false)))
            .unwrap();
        conn.write_record(8, &params).unwrap();
        conn.write_record(9, &Record::from(BeginRequest::new(Role::Responder, false)))
            .unwrap();
        conn.write_record(9, &params).unwrap();
        conn.write_record(9, &Record::from(Params::default())).unwrap();
        conn.write_record(8, &Record::from(Params::default())).unwrap();
        conn.write_record(9, &Record::from(Stdin::new(b"nine".to_vec())))
            .unwrap();
        conn.write_record(8, &Record::from(Stdin::new(b"eight".to_vec())))
            .unwrap();
        conn.write_record(9, &Record::from(Stdin::new(vec![]))).unwrap();
        conn.write_record(8, &Record::from(Stdin::new(vec![]))).unwrap();

        let mut ended = std::collections::HashSet::new();
        loop {
            match conn.read_record().unwrap() {
                None => break,
                Some((id, Record::EndRequest(e))) => {
                    assert_eq!(e, EndRequest::new(0, ProtocolStatus::RequestComplete));
                    ended.insert(id);
                }
                Some((id, _)) => assert!(id == 8 || id == 9, "unexpected request id {id}"),
            }
        }

        assert_eq!(ended, [8u16, 9u16].into_iter().collect());
        drop(stream);
        handle.stop();
    }

    #[test]
    fn unknown_role_ends_request_immediately() {
        let handle = start_test_server(Role::Responder, 4, |_req| {});
        let (stream, mut conn) = connect(&handle);

        conn.write_record(5, &Record::from(BeginRequest::new(Role::Filter, false)))
            .unwrap();

        let (id, record) = conn.read_record().unwrap().unwrap();
        assert_eq!(id, 5);
        assert_eq!(
            record,
            Record::from(EndRequest::new(0, ProtocolStatus::UnknownRole))
        );

        stream.shutdown(Shutdown::Write).unwrap();
        assert!(conn.read_record().unwrap().is_none());
        handle.stop();
    }

    #[test]
    fn abort_request_after_spawn_still_finalizes() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let observed_abort = Arc::new(AtomicBool::new(false));
        let observed_in_handler = Arc::clone(&observed_abort);

        let handle = start_test_server(Role::Responder, 4, move |req| {
            let _ = req.stdin().read_all();
            let start = std::time::Instant::now();
            while !req.is_aborted() {
                if start.elapsed() > Duration::from_secs(2) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            observed_in_handler.store(true, Ordering::SeqCst);
        });
        let (stream, mut conn) = connect(&handle);

        conn.write_record(7, &Record::from(BeginRequest::new(Role::Responder, false)))
            .unwrap();
        conn.write_record(7, &Record::from(Params::from_pairs(&get_request_environ())))
            .unwrap();
        conn.write_record(7, &Record::from(Params::default())).unwrap();
        conn.write_record(7, &Record::from(Stdin::new(vec![]))).unwrap();

        // Give the handler thread time to spawn and start its wait loop.
        std::thread::sleep(Duration::from_millis(50));
        conn.write_record(7, &Record::from(AbortRequest)).unwrap();

        let mut saw_stdout_eof = false;
        let mut saw_stderr_eof = false;
        loop {
            let (id, record) = conn.read_record().unwrap().expect("connection closed early");
            assert_eq!(id, 7);
            match record {
                Record::Stdout(s) => {
                    assert!(s.content().is_empty());
                    saw_stdout_eof = true;
                }
                Record::Stderr(s) => {
                    assert!(s.content().is_empty());
                    saw_stderr_eof = true;
                }
                Record::EndRequest(e) => {
                    assert_eq!(e, EndRequest::new(0, ProtocolStatus::RequestComplete));
                    break;
                }
                other => panic!("unexpected record: {other:?}"),
            }
        }

        assert!(saw_stdout_eof && saw_stderr_eof);
        assert!(observed_abort.load(Ordering::SeqCst));

        stream.shutdown(Shutdown::Write).unwrap();
        assert!(conn.read_record().unwrap().is_none());
        handle.stop();
    }

    #[test]
    fn keep_conn_allows_multiple_requests_over_one_connection() {
        let handle = start_test_server(Role::Responder, 4, |_req| {});
        let (stream, mut conn) = connect(&handle);
        let environ = get_request_environ();

        fn run_request(conn: &mut Connection, environ: &Pairs, id: u16, keep_conn: bool) {
            conn.write_record(id, &Record::from(BeginRequest::new(Role::Responder, keep_conn)))
                .unwrap();
            conn.write_record(id, &Record::from(Params::from_pairs(environ)))
                .unwrap();
            conn.write_record(id, &Record::from(Params::default())).unwrap();
            conn.write_record(id, &Record::from(Stdin::new(vec![]))).unwrap();

            loop {
                let (got_id, record) =
                    conn.read_record().unwrap().expect("connection closed early");
                assert_eq!(got_id, id);
                if let Record::EndRequest(e) = record {
                    assert_eq!(e, EndRequest::new(0, ProtocolStatus::RequestComplete));
                    break;
                }
            }
        }

        run_request(&mut conn, &environ, 3, true);
        for id in [4u16, 44, 444] {
            run_request(&mut conn, &environ, id, false);
        }

        // The first BEGIN_REQUEST asked to keep the connection open, and the peer hasn't
        // finished writing: nothing should arrive (the connection must still be alive).
        stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        assert!(conn.read_record().is_err());

        stream.set_read_timeout(None).unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        assert!(conn.read_record().unwrap().is_none());
        handle.stop();
    }

    #[test]
    fn unknown_record_type_gets_unknown_type_reply_then_closes() {
        let handle = start_test_server(Role::Responder, 4, |_req| {});
        let (mut stream, mut conn) = connect(&handle);

        // version=1, type=123 (unassigned), request_id=0, content_length=0, padding_length=0
        stream.write_all(&[1, 123, 0, 0, 0, 0, 0, 0]).unwrap();

        let (id, record) = conn.read_record().unwrap().unwrap();
        assert_eq!(id, 0);
        assert_eq!(record, Record::from(UnknownType::new(123)));

        assert!(conn.read_record().unwrap().is_none());
        handle.stop();
    }
}

fn panic_message(any: Box<dyn std::any::Any + Send>) -> String {
    any.downcast_ref::<String>()
        .cloned()
        .or_else(|| any.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_default()
}

#[allow(clippy::too_many_arguments)]
fn start_supervisor(
    listener: BoundListener,
    config: Arc<HandlerConfig>,
    handler: Arc<dyn Fn(Request) + Send + Sync>,
    max_conns: usize,
    buffer_size: usize,
    num_workers: usize,
    grace: Duration,
    address: SocketAddr,
    socket_path: Option<PathBuf>,
) -> io::Result<ServerHandle> {
    let workers = Arc::new(Mutex::new(Vec::with_capacity(num_workers)));
    let shutdown = Arc::new(AtomicBool::new(false));

    for _ in 0..num_workers {
        let pid = fork_worker(&listener, &config, &handler, max_conns, buffer_size)?;
        workers.lock().unwrap().push(pid);
    }

    log::info!(
        address:? = address, num_workers = num_workers;
        "FastCGI server listening (multi-worker)"
    );

    let supervisor_loop = {
        let workers = Arc::clone(&workers);
        let shutdown = Arc::clone(&shutdown);
        let listener = listener;
        let config = Arc::clone(&config);
        let handler = Arc::clone(&handler);

        thread::spawn(move || {
            supervise(
                workers,
                shutdown,
                listener,
                config,
                handler,
                max_conns,
                buffer_size,
            )
        })
    };

    Ok(ServerHandle {
        address,
        socket_path,
        inner: HandleInner::Supervisor {
            supervisor_loop,
            shutdown,
            workers,
            grace,
        },
    })
}

fn fork_worker(
    listener: &BoundListener,
    config: &Arc<HandlerConfig>,
    handler: &Arc<dyn Fn(Request) + Send + Sync>,
    max_conns: usize,
    buffer_size: usize,
) -> io::Result<Pid> {
    let worker_listener = listener.try_clone()?;

    // Safety: the child only touches already-initialized, thread-safe state (Arcs and a
    // plain socket fd) before execing into the accept loop; it never returns across this call.
    match unsafe { unistd::fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            let config = Arc::clone(config);
            let handler = Arc::clone(handler);
            let exit = listener::run_worker(worker_listener, config, handler, max_conns, buffer_size);
            match exit {
                Ok(_) => std::process::exit(0),
                Err(e) => {
                    log::error!(error:err = e; "FastCGI worker exiting after a fatal I/O error");
                    std::process::exit(1)
                }
            }
        }
    }
}

/// Watches forked workers: reaps ones that exit and respawns them, unless shutdown has been
/// requested (at which point `ServerHandle::stop` does its own waiting/killing and this loop
/// just needs to get out of the way).
#[allow(clippy::too_many_arguments)]
fn supervise(
    workers: Arc<Mutex<Vec<Pid>>>,
    shutdown: Arc<AtomicBool>,
    listener: BoundListener,
    config: Arc<HandlerConfig>,
    handler: Arc<dyn Fn(Request) + Send + Sync>,
    max_conns: usize,
    buffer_size: usize,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                workers.lock().unwrap().retain(|&p| p != pid);

                if !shutdown.load(Ordering::SeqCst) {
                    log::warn!(pid = pid.as_raw(); "FastCGI worker exited unexpectedly, respawning");
                    match fork_worker(&listener, &config, &handler, max_conns, buffer_size) {
                        Ok(new_pid) => workers.lock().unwrap().push(new_pid),
                        Err(e) => {
                            log::error!(error:err = e; "failed to respawn FastCGI worker");
                        }
                    }
                }
            }
            Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => {
                thread::sleep(Duration::from_millis(200));
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!(error:err = e; "waitpid failed while supervising FastCGI workers");
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
}
