//! The single-process accept loop: poll a listening socket for readability, accept connections
//! non-blockingly, and hand each one to a bounded pool of connection-handler threads.
//!
//! This is what every worker process runs, whether there is one of them (no fork) or several
//! (`num_workers > 1` forks one of these per child). Graceful shutdown works the same way in
//! either case: a [`mio::Waker`] wakes the blocked `poll()` call so the thread can drain the
//! threadpool and return instead of looping forever.

use crate::connection::Connection;
use crate::connection_handler::{self, HandlerConfig};
use crate::request::Request;
use mio::event::Events;
use mio::net::{TcpListener as MioTcpListener, UnixListener as MioUnixListener};
use mio::{Interest, Poll, Token, Waker};
use nix::sys::socket::{setsockopt, sockopt};
use std::io;
use std::net::TcpListener as StdTcpListener;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

const SOURCE: Token = Token(0);
const SHUTDOWN: Token = Token(1);
const RETRY: Token = Token(2);

/// A bound-but-not-yet-polled listening socket, handed to a worker (forked or not) to drive.
pub(crate) enum BoundListener {
    Tcp(StdTcpListener),
    Unix(StdUnixListener),
}

impl BoundListener {
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            BoundListener::Tcp(l) => Ok(BoundListener::Tcp(l.try_clone()?)),
            BoundListener::Unix(l) => Ok(BoundListener::Unix(l.try_clone()?)),
        }
    }
}

enum MioListener {
    Tcp(MioTcpListener),
    Unix(MioUnixListener),
}

impl MioListener {
    fn from_std(listener: BoundListener) -> io::Result<Self> {
        Ok(match listener {
            BoundListener::Tcp(l) => MioListener::Tcp(MioTcpListener::from_std(l)),
            BoundListener::Unix(l) => MioListener::Unix(MioUnixListener::from_std(l)),
        })
    }

    fn register(&mut self, registry: &mio::Registry) -> io::Result<()> {
        match self {
            MioListener::Tcp(l) => registry.register(l, SOURCE, Interest::READABLE),
            MioListener::Unix(l) => registry.register(l, SOURCE, Interest::READABLE),
        }
    }

    /// Accepts one connection, applying the wire-level tuning `ServerSpec::buffer_size`
    /// documents: `TCP_NODELAY` plus `SO_RCVBUF`/`SO_SNDBUF` sized to `buffer_size` on TCP
    /// streams (a Unix-domain socket has no send/receive buffer knobs worth setting).
    fn accept(&self, buffer_size: usize) -> io::Result<Connection> {
        match self {
            MioListener::Tcp(l) => {
                let (stream, _) = l.accept()?;
                let stream = std::net::TcpStream::from(stream);
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                setsockopt(&stream, sockopt::RcvBuf, &buffer_size).map_err(io::Error::from)?;
                setsockopt(&stream, sockopt::SndBuf, &buffer_size).map_err(io::Error::from)?;
                Connection::from_tcp(stream, buffer_size)
            }
            MioListener::Unix(l) => {
                let (stream, _) = l.accept()?;
                let stream = std::os::unix::net::UnixStream::from(stream);
                stream.set_nonblocking(false)?;
                Connection::from_unix(stream, buffer_size)
            }
        }
    }
}

/// Caps how many connection-handler threads can be running at once. `try_acquire` never
/// blocks; the accept loop itself re-checks once a permit is released (signaled by waking the
/// same `Poll` the accept loop blocks on), rather than blocking the poll thread indefinitely —
/// that would also stall the shutdown waker behind a saturated pool.
struct Gate {
    permits: Mutex<usize>,
    retry: Waker,
}

impl Gate {
    fn new(permits: usize, retry: Waker) -> Self {
        Gate {
            permits: Mutex::new(permits),
            retry,
        }
    }

    fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().unwrap();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Returns a permit and wakes the accept loop so it retries connections it had to defer
    /// while the pool was saturated.
    fn release(&self) {
        *self.permits.lock().unwrap() += 1;
        let _ = self.retry.wake();
    }
}

/// Runs the accept loop to completion on the calling thread, blocking until a `SIGHUP` is
/// delivered to this process. This is what a forked worker runs directly (never returning to
/// its caller in the usual sense: the process exits right after).
pub(crate) fn run_worker(
    listener: BoundListener,
    config: Arc<HandlerConfig>,
    handler: Arc<dyn Fn(Request) + Send + Sync>,
    max_conns: usize,
    buffer_size: usize,
) -> io::Result<LoopExit> {
    let mut listener = MioListener::from_std(listener)?;
    let poll = Poll::new()?;
    listener.register(poll.registry())?;
    let waker = Waker::new(poll.registry(), SHUTDOWN)?;

    let mut signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGHUP])?;
    thread::spawn(move || {
        if signals.forever().next().is_some() {
            let _ = waker.wake();
        }
    });

    loop_with_poll(listener, poll, config, handler, max_conns, buffer_size)
}

pub(crate) enum LoopExit {
    Normal,
    Err(io::Error),
}

fn loop_with_poll(
    mut listener: MioListener,
    mut poll: Poll,
    config: Arc<HandlerConfig>,
    handler: Arc<dyn Fn(Request) + Send + Sync>,
    max_conns: usize,
    buffer_size: usize,
) -> io::Result<LoopExit> {
    let pool = threadpool::Builder::new()
        .num_threads(max_conns.max(1))
        .build();
    let retry_waker = Waker::new(poll.registry(), RETRY)?;
    let gate = Arc::new(Gate::new(max_conns.max(1), retry_waker));
    let mut events = Events::with_capacity(128);

    loop {
        if let Err(err) = poll.poll(&mut events, None) {
            log::warn!(error:err = err; "poll call failed, worker is exiting");
            pool.join();
            return Ok(LoopExit::Err(err));
        }

        for event in events.iter() {
            match event.token() {
                SOURCE | RETRY => loop {
                    if !gate.try_acquire() {
                        // Pool is saturated: stop draining accepts for now. `Gate::release`
                        // wakes the `RETRY` token once a handler thread frees a slot, so this
                        // loop picks back up instead of missing an edge-triggered readiness
                        // notification.
                        break;
                    }

                    match listener.accept(buffer_size) {
                        Ok(connection) => {
                            let config = Arc::clone(&config);
                            let handler = Arc::clone(&handler);
                            let gate = Arc::clone(&gate);
                            pool.execute(move || {
                                connection_handler::handle_connection(connection, config, handler);
                                gate.release();
                            });
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            gate.release();
                            break;
                        }
                        Err(err) => {
                            gate.release();
                            log::warn!(error:err = err; "accept call failed, worker is exiting");
                            pool.join();
                            return Ok(LoopExit::Err(err));
                        }
                    }
                },
                SHUTDOWN => {
                    pool.join();
                    return Ok(LoopExit::Normal);
                }
                _ => unreachable!(),
            }
        }
    }
}

/// Bundles what the in-process (no-fork) case needs to run `run()` on a background thread and
/// hand a join/stop handle back to the caller synchronously.
pub(crate) struct SingleWorker {
    pub(crate) handle: JoinHandle<LoopExit>,
    pub(crate) waker: Waker,
    pub(crate) observe_shutdown: Receiver<()>,
}

pub(crate) fn spawn_single(
    listener: BoundListener,
    config: Arc<HandlerConfig>,
    handler: Arc<dyn Fn(Request) + Send + Sync>,
    max_conns: usize,
    buffer_size: usize,
) -> io::Result<SingleWorker> {
    let mut listener = MioListener::from_std(listener)?;
    let poll = Poll::new()?;
    listener.register(poll.registry())?;
    let waker = Waker::new(poll.registry(), SHUTDOWN)?;

    let (signal_shutdown, observe_shutdown): (SyncSender<()>, Receiver<()>) = sync_channel(0);

    let handle = thread::spawn(move || {
        let result = loop_with_poll(listener, poll, config, handler, max_conns, buffer_size);
        let exit = match result {
            Ok(exit) => exit,
            Err(err) => LoopExit::Err(err),
        };
        let _ = signal_shutdown.send(());
        exit
    });

    Ok(SingleWorker {
        handle,
        waker,
        observe_shutdown,
    })
}
