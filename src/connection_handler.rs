use crate::connection::{Connection, WriteHandle};
use crate::error::Error;
use crate::record::{
    BeginRequest, EndRequest, GetValuesResult, Pairs, Params, ProtocolStatus, Record, Role,
    UnknownType,
};
use crate::request::{self, Request};
use crate::stream::{InputStream, OutputStream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Configuration a connection handler needs that comes from the listener, not the wire.
pub struct HandlerConfig {
    pub role: Role,
    pub max_input_mem: usize,
    pub capabilities: Pairs,
}

struct ActiveRequest {
    role: Role,
    environ_buf: Vec<u8>,
    environ: Option<Pairs>,
    stdin: InputStream,
    stdin_eof: bool,
    data: Option<InputStream>,
    data_eof: bool,
    stdout: OutputStream,
    stderr: OutputStream,
    writer: WriteHandle,
    spawned: bool,
    aborted: Arc<AtomicBool>,
}

impl ActiveRequest {
    /// Whether this request has everything its role needs to spawn: the environment (PARAMS-EOF
    /// has landed) plus, for roles with a second gating stream, that stream's EOF. The two
    /// conditions can land in either order on the wire (STDIN-EOF before PARAMS-EOF is legal,
    /// just atypical), so every record handler that can complete one of them re-checks this
    /// rather than assuming its own trigger is always the last one to arrive.
    fn ready_to_spawn(&self) -> bool {
        if self.spawned || self.environ.is_none() {
            return false;
        }
        match self.role {
            Role::Authorizer => true,
            Role::Responder => self.stdin_eof,
            Role::Filter => self.data_eof,
        }
    }
}

/// State shared between the reader task and the handler-finalization step of every request
/// spawned on this connection.
///
/// A single cooperatively-scheduled thread could let "look up a request id" and "remove a
/// request id" run on the same thread, never interleaved. A handler spawned on its own OS thread
/// has no such guarantee, so the request table lives here, next to the close-arbiter bookkeeping
/// it is already synchronized with: one lock covers both "is this request still live" and
/// "should the connection close now".
struct Shared {
    requests: HashMap<u16, ActiveRequest>,
    active_requests: usize,
    peer_closed: bool,
    keep_open: Option<bool>,
}

impl Shared {
    fn should_close(&self) -> bool {
        self.active_requests == 0 && (self.peer_closed || !self.keep_open.unwrap_or(false))
    }
}

/// The connection-close arbiter: the connection is done exactly when no requests remain live and
/// either the peer has finished writing, or it never asked to keep the connection open. The
/// predicate is re-evaluated under the lock every time either side signals, matching the
/// `no_requests AND (peer_closed OR NOT keep_open)` rule this crate is specified against.
struct Arbiter {
    state: Mutex<Shared>,
    cvar: Condvar,
}

impl Arbiter {
    fn new() -> Self {
        Arbiter {
            state: Mutex::new(Shared {
                requests: HashMap::new(),
                active_requests: 0,
                peer_closed: false,
                keep_open: None,
            }),
            cvar: Condvar::new(),
        }
    }

    fn wait_for_close(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.should_close() {
            state = self.cvar.wait(state).unwrap();
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        let result = f(&mut state);
        self.cvar.notify_all();
        result
    }
}

/// Drives one accepted connection to completion: reads records, maintains the per-request table,
/// spawns a handler task per request at the right moment, and replies to management queries.
/// Blocks the calling thread until the connection closes.
pub fn handle_connection<F>(mut connection: Connection, config: Arc<HandlerConfig>, handler: Arc<F>)
where
    F: Fn(Request) + Send + Sync + 'static,
{
    let arbiter = Arc::new(Arbiter::new());

    loop {
        let read = connection.read_record();

        let (request_id, record) = match read {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                arbiter.with(|s| s.peer_closed = true);
                break;
            }
            Err(e) => {
                log::warn!(error:? = e; "terminating connection after a protocol error");
                break;
            }
        };

        let outcome = dispatch(&mut connection, &config, &arbiter, &handler, request_id, record);

        match outcome {
            Ok(ShouldContinue::Continue) => {}
            Ok(ShouldContinue::Stop) => break,
            Err(e) => {
                log::warn!(error:? = e; "terminating connection after a protocol error");
                break;
            }
        }
    }

    arbiter.wait_for_close();
}

enum ShouldContinue {
    Continue,
    Stop,
}

fn dispatch<F>(
    connection: &mut Connection,
    config: &Arc<HandlerConfig>,
    arbiter: &Arc<Arbiter>,
    handler: &Arc<F>,
    request_id: u16,
    record: Record,
) -> Result<ShouldContinue, Error>
where
    F: Fn(Request) + Send + Sync + 'static,
{
    if request_id == 0 {
        return dispatch_management(connection, config, record);
    }

    match record {
        Record::BeginRequest(begin) => {
            handle_begin_request(connection, config, arbiter, request_id, begin)?;
        }
        Record::Params(params) => {
            handle_params(arbiter, handler, request_id, params)?;
        }
        Record::Stdin(stdin) => {
            handle_stdin(arbiter, handler, request_id, stdin.into_content())?;
        }
        Record::Data(data) => {
            handle_data(arbiter, handler, request_id, data.into_content())?;
        }
        Record::AbortRequest(_) => {
            handle_abort(arbiter, request_id)?;
        }
        Record::UnknownType(unknown) => {
            connection.write_record(0, &Record::from(UnknownType::new(unknown.type_id())))?;
            return Ok(ShouldContinue::Stop);
        }
        other => {
            return Err(Error::UnexpectedRecordType(other.type_id()));
        }
    }

    Ok(ShouldContinue::Continue)
}

fn dispatch_management(
    connection: &mut Connection,
    config: &Arc<HandlerConfig>,
    record: Record,
) -> Result<ShouldContinue, Error> {
    match record {
        Record::GetValues(query) => {
            let mut result = Pairs::new();
            for name in query.names() {
                if let Some(value) = config.capabilities.get(name) {
                    result.insert(name.to_vec(), value.clone());
                }
            }
            connection.write_record(0, &Record::from(GetValuesResult::new(result)))?;
            Ok(ShouldContinue::Continue)
        }
        Record::UnknownType(unknown) => {
            connection.write_record(0, &Record::from(UnknownType::new(unknown.type_id())))?;
            Ok(ShouldContinue::Stop)
        }
        _ => {
            connection.write_record(0, &Record::from(UnknownType::new(record.type_id())))?;
            Ok(ShouldContinue::Continue)
        }
    }
}

fn handle_begin_request(
    connection: &mut Connection,
    config: &Arc<HandlerConfig>,
    arbiter: &Arc<Arbiter>,
    request_id: u16,
    begin: BeginRequest,
) -> Result<(), Error> {
    if begin.role() != config.role {
        connection.write_record(
            request_id,
            &Record::from(EndRequest::new(0, ProtocolStatus::UnknownRole)),
        )?;
        return Ok(());
    }

    let data = (begin.role() == Role::Filter).then(|| InputStream::new(config.max_input_mem));
    let writer = connection.writer();

    let active = ActiveRequest {
        role: begin.role(),
        environ_buf: Vec::new(),
        environ: None,
        stdin: InputStream::new(config.max_input_mem),
        stdin_eof: false,
        data,
        data_eof: false,
        stdout: OutputStream::new(writer.clone(), request_id, request::stdout_wrap),
        stderr: OutputStream::new(writer.clone(), request_id, request::stderr_wrap),
        writer,
        spawned: false,
        aborted: Arc::new(AtomicBool::new(false)),
    };

    arbiter.with(|s| {
        if s.keep_open.is_none() {
            s.keep_open = Some(begin.keep_alive());
        }
        s.active_requests += 1;
        s.requests.insert(request_id, active);
    });

    Ok(())
}

fn handle_params<F>(
    arbiter: &Arc<Arbiter>,
    handler: &Arc<F>,
    request_id: u16,
    params: Params,
) -> Result<(), Error>
where
    F: Fn(Request) + Send + Sync + 'static,
{
    let decoded = arbiter.with(|s| -> Result<Option<Pairs>, Error> {
        let req = s
            .requests
            .get_mut(&request_id)
            .ok_or(Error::UnknownRequestId(request_id))?;

        if !params.content().is_empty() {
            req.environ_buf.extend_from_slice(params.content());
            return Ok(None);
        }

        let buf = std::mem::take(&mut req.environ_buf);
        let environ = Params::decode(buf)?;
        req.environ = Some(environ.clone());
        Ok(Some(environ))
    })?;

    if decoded.is_some() {
        let spawn_now = arbiter.with(|s| {
            s.requests
                .get(&request_id)
                .is_some_and(ActiveRequest::ready_to_spawn)
        });
        if spawn_now {
            spawn_if_ready(arbiter, handler, request_id)?;
        }
    }

    Ok(())
}

fn handle_stdin<F>(
    arbiter: &Arc<Arbiter>,
    handler: &Arc<F>,
    request_id: u16,
    content: Vec<u8>,
) -> Result<(), Error>
where
    F: Fn(Request) + Send + Sync + 'static,
{
    let is_eof = content.is_empty();

    let (stdin, should_spawn) = arbiter.with(|s| -> Result<_, Error> {
        let req = s
            .requests
            .get_mut(&request_id)
            .ok_or(Error::UnknownRequestId(request_id))?;
        if is_eof {
            req.stdin_eof = true;
        }
        Ok((req.stdin.clone(), req.ready_to_spawn()))
    })?;

    stdin.feed(&content)?;

    if should_spawn {
        spawn_if_ready(arbiter, handler, request_id)?;
    }

    Ok(())
}

fn handle_data<F>(
    arbiter: &Arc<Arbiter>,
    handler: &Arc<F>,
    request_id: u16,
    content: Vec<u8>,
) -> Result<(), Error>
where
    F: Fn(Request) + Send + Sync + 'static,
{
    let is_eof = content.is_empty();

    let (data, should_spawn) = arbiter.with(|s| -> Result<_, Error> {
        let req = s
            .requests
            .get_mut(&request_id)
            .ok_or(Error::UnknownRequestId(request_id))?;
        let data = req
            .data
            .clone()
            .ok_or(Error::UnknownRequestId(request_id))?;
        if is_eof {
            req.data_eof = true;
        }
        Ok((data, req.ready_to_spawn()))
    })?;

    data.feed(&content)?;

    if should_spawn {
        spawn_if_ready(arbiter, handler, request_id)?;
    }

    Ok(())
}

fn handle_abort(arbiter: &Arc<Arbiter>, request_id: u16) -> Result<(), Error> {
    let finished = arbiter.with(|s| -> Result<Option<ActiveRequest>, Error> {
        let spawned = s
            .requests
            .get(&request_id)
            .ok_or(Error::UnknownRequestId(request_id))?
            .spawned;

        if spawned {
            s.requests[&request_id].aborted.store(true, Ordering::SeqCst);
            return Ok(None);
        }

        let req = s.requests.remove(&request_id).expect("checked above");
        s.active_requests -= 1;
        Ok(Some(req))
    })?;

    if let Some(req) = finished {
        req.writer.write_record(
            request_id,
            &Record::from(EndRequest::new(0, ProtocolStatus::RequestComplete)),
        )?;
    }

    Ok(())
}

/// Spawns the handler task once the request's environment and whichever input stream gates its
/// role (stdin for RESPONDER, data for FILTER, nothing extra for AUTHORIZER) has reached EOF.
fn spawn_if_ready<F>(arbiter: &Arc<Arbiter>, handler: &Arc<F>, request_id: u16) -> Result<(), Error>
where
    F: Fn(Request) + Send + Sync + 'static,
{
    let spawn_args = arbiter.with(|s| {
        let req = match s.requests.get_mut(&request_id) {
            Some(req) => req,
            None => return None,
        };

        if !req.ready_to_spawn() {
            return None;
        }
        let environ = req.environ.clone()?;
        req.spawned = true;

        Some((
            req.role,
            environ,
            req.stdin.clone(),
            req.data.clone(),
            req.stdout.clone(),
            req.stderr.clone(),
            req.writer.clone(),
            Arc::clone(&req.aborted),
        ))
    });

    let Some((role, environ, stdin, data, stdout, stderr, writer, aborted)) = spawn_args else {
        return Ok(());
    };

    let keep_conn = arbiter.with(|s| s.keep_open.unwrap_or(false));

    let request = Request::new(
        request_id,
        role,
        environ,
        stdin,
        data,
        stdout.clone(),
        stderr.clone(),
        keep_conn,
        Arc::clone(&aborted),
    );

    let handler = Arc::clone(handler);
    let arbiter = Arc::clone(arbiter);

    thread::spawn(move || {
        let app_status = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler(request);
        }))
        .map(|_| 0)
        .unwrap_or(1);

        let _ = stdout.close();
        let _ = stderr.close();

        if let Err(e) = writer.write_record(
            request_id,
            &Record::from(EndRequest::new(app_status, ProtocolStatus::RequestComplete)),
        ) {
            log::warn!(error:? = e; "failed to write END_REQUEST for request {request_id}");
        }

        arbiter.with(|s| {
            s.requests.remove(&request_id);
            debug_assert!(s.active_requests > 0);
            s.active_requests -= 1;
        });
    });

    Ok(())
}
