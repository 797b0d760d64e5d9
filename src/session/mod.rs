//! Front-end side of a debug session.
//!
//! A [`Session`] owns one socket to a debug agent and allows one request in
//! flight at a time. Replies are read on a background thread and handed to
//! the waiting caller through a condition variable.

mod mapping;

pub use mapping::{
    identity_factory, normalize_path, qualify_path, IdentityMapper, MapperFactory, SourceLocation,
    SourceMapper,
};

use std::collections::VecDeque;
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::protocol::{
    DebuggerMessage, FramedReader, FramedWriter, HostMessage, Scope, StackFrame, Variable,
    UNRESOLVED_BREAKPOINT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Step,
    Breakpoint(i64),
}

/// Notifications raised by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The handshake finished; `path` is the qualified program path.
    ProgramLoaded { path: String },
    Stopped(StopKind),
    /// The socket closed. No further requests can succeed.
    Ended,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Program to load, absolute or relative to `workspace`.
    pub program: String,
    pub workspace: PathBuf,
    /// Ask the agent for verbose message tracing.
    pub trace: bool,
}

/// A breakpoint as the front end reports it, in external coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointInfo {
    pub id: i64,
    pub location: SourceLocation,
}

impl BreakpointInfo {
    pub fn verified(&self) -> bool {
        self.id != UNRESOLVED_BREAKPOINT
    }
}

#[derive(Default)]
struct State {
    busy: bool,
    inbox: VecDeque<DebuggerMessage>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Session {
    shared: Arc<Shared>,
    writer: Mutex<FramedWriter<TcpStream>>,
    stream: TcpStream,
    workspace: PathBuf,
    mapper: Box<dyn SourceMapper>,
    events: Mutex<Sender<SessionEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl Session {
    /// Run the startup handshake on an accepted agent connection.
    ///
    /// Any reply of the wrong type aborts the session.
    pub fn start(
        stream: TcpStream,
        options: &SessionOptions,
        mapper_factory: &MapperFactory,
        events: Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        });
        let reader = spawn_reader(stream.try_clone()?, Arc::clone(&shared), events.clone());

        let mut session = Self {
            shared,
            writer: Mutex::new(FramedWriter::new(stream.try_clone()?)),
            stream,
            workspace: options.workspace.clone(),
            mapper: Box::new(IdentityMapper),
            events: Mutex::new(events),
            reader: Some(reader),
        };

        let path = session
            .handshake(options)
            .map_err(|e| SessionError::Handshake(Box::new(e)))?;
        let qualified = qualify_path(&path, &session.workspace);
        let program_dir = Path::new(&qualified)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| session.workspace.clone());
        session.mapper = mapper_factory(&program_dir, &session.workspace);
        info!(path = %qualified, "Debug session started");
        session.notify(SessionEvent::ProgramLoaded { path: qualified });
        Ok(session)
    }

    fn handshake(&self, options: &SessionOptions) -> Result<String, SessionError> {
        let greeting = self.wait_reply()?;
        expect_kind(&greeting, "connect")?;

        if options.trace {
            self.send(&HostMessage::StartDebugLogging)?;
        }

        let program = normalize_path(&options.program, &self.workspace);
        let reply = self.request(&HostMessage::LoadProgram { path: program }, false)?;
        match reply {
            DebuggerMessage::ProgramLoaded { source } => Ok(source.path),
            other => Err(unexpected("programLoaded", &other)),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn continue_execution(&self) -> Result<StopKind, SessionError> {
        self.resume(HostMessage::Continue)
    }

    pub fn next(&self) -> Result<StopKind, SessionError> {
        self.resume(HostMessage::Next)
    }

    pub fn step_in(&self) -> Result<StopKind, SessionError> {
        self.resume(HostMessage::StepIn)
    }

    pub fn step_out(&self) -> Result<StopKind, SessionError> {
        self.resume(HostMessage::StepOut)
    }

    /// Up to `count` frames starting `index` frames below the current one,
    /// in external coordinates with qualified paths.
    pub fn stack(&self, index: u32, count: u32) -> Result<Vec<StackFrame>, SessionError> {
        let frames = match self.request(&HostMessage::GetStack { index, count }, false)? {
            DebuggerMessage::Stack { frames } => frames,
            other => return Err(unexpected("stack", &other)),
        };
        Ok(frames
            .into_iter()
            .map(|mut frame| {
                if let Some(source) = frame.source.as_mut() {
                    let external = self.to_external(&source.path, frame.line, frame.column);
                    frame.line = external.line;
                    frame.column = external.column;
                    source.path = external.path;
                } else {
                    frame.column += 1;
                }
                frame
            })
            .collect())
    }

    /// Scopes of the frame at `frame_id`, positioned like [`Session::stack`].
    pub fn scopes(&self, frame_id: u32) -> Result<Vec<Scope>, SessionError> {
        let scopes = match self.request(&HostMessage::GetScopes { frame_id }, false)? {
            DebuggerMessage::Scopes { scopes } => scopes,
            other => return Err(unexpected("scopes", &other)),
        };
        Ok(scopes
            .into_iter()
            .map(|mut scope| {
                match (scope.source.as_mut(), scope.line) {
                    (Some(source), Some(line)) => {
                        let end = scope
                            .end_line
                            .map(|end| self.to_external(&source.path, end, 0).line);
                        let start =
                            self.to_external(&source.path, line, scope.column.unwrap_or(0));
                        scope.line = Some(start.line);
                        scope.column = Some(start.column);
                        scope.end_line = end;
                        source.path = start.path;
                    }
                    _ => scope.column = scope.column.map(|c| c + 1),
                }
                scope
            })
            .collect())
    }

    pub fn variables(&self, reference: u32) -> Result<Vec<Variable>, SessionError> {
        match self.request(&HostMessage::GetVariables { reference }, false)? {
            DebuggerMessage::Variables { variables } => Ok(variables),
            other => Err(unexpected("variables", &other)),
        }
    }

    /// Assign `literal`, which is sent as a JSON value so the target sees a
    /// number, boolean, string or object rather than its source text.
    pub fn set_variable(
        &self,
        reference: u32,
        name: &str,
        literal: &str,
    ) -> Result<Variable, SessionError> {
        let value: serde_json::Value =
            serde_json::from_str(literal).map_err(|source| SessionError::InvalidLiteral {
                literal: literal.to_string(),
                source,
            })?;
        let message = HostMessage::SetVariable {
            reference,
            name: name.to_string(),
            value,
        };
        match self.request(&message, false)? {
            DebuggerMessage::VariableSet { new_value } => Ok(new_value),
            other => Err(unexpected("variableSet", &other)),
        }
    }

    /// Candidate breakpoint positions on `line` of `path`.
    pub fn breakpoint_locations(
        &self,
        path: &str,
        line: u32,
    ) -> Result<Vec<SourceLocation>, SessionError> {
        let internal = self.to_internal(path, line, 1);
        let message = HostMessage::GetBreakpointsForLine {
            path: internal.path.clone(),
            line: internal.line,
            column: internal.column,
        };
        match self.request(&message, true)? {
            DebuggerMessage::BreakpointsForLine { locations } => Ok(locations
                .into_iter()
                .map(|l| self.to_external(&internal.path, l.line, l.column))
                .collect()),
            other => Err(unexpected("breakpointsForLine", &other)),
        }
    }

    /// Set a breakpoint. An unresolved breakpoint is not an error; it comes
    /// back with id [`UNRESOLVED_BREAKPOINT`] at the requested location.
    pub fn set_breakpoint(
        &self,
        path: &str,
        line: u32,
        column: Option<u32>,
    ) -> Result<BreakpointInfo, SessionError> {
        let requested = SourceLocation {
            path: qualify_path(&normalize_path(path, &self.workspace), &self.workspace),
            line,
            column: column.unwrap_or(1),
        };
        let internal = self.to_internal(path, line, requested.column);
        let message = HostMessage::SetBreakpoint {
            path: internal.path.clone(),
            line: internal.line,
            column: internal.column,
        };
        match self.request(&message, true)? {
            DebuggerMessage::BreakpointSet { id, location } => {
                let location = if id == UNRESOLVED_BREAKPOINT {
                    requested
                } else {
                    self.to_external(&internal.path, location.line, location.column)
                };
                Ok(BreakpointInfo { id, location })
            }
            other => Err(unexpected("breakpointSet", &other)),
        }
    }

    pub fn remove_breakpoint(&self, id: i64) -> Result<bool, SessionError> {
        match self.request(&HostMessage::RemoveBreakpoint { id }, true)? {
            DebuggerMessage::BreakpointRemoved { removed, .. } => Ok(removed),
            other => Err(unexpected("breakpointRemoved", &other)),
        }
    }

    /// Close the socket. The agent resumes the program when it sees this.
    pub fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(error = %e, "Socket already closed");
        }
    }

    fn resume(&self, message: HostMessage) -> Result<StopKind, SessionError> {
        let stop = match self.request(&message, false)? {
            DebuggerMessage::StopOnStep => StopKind::Step,
            DebuggerMessage::StopOnBreakpoint { id } => StopKind::Breakpoint(id),
            other => return Err(unexpected("stopOnStep", &other)),
        };
        self.notify(SessionEvent::Stopped(stop));
        Ok(stop)
    }

    /// Send one message and wait for its reply.
    ///
    /// With `wait_idle` the call queues behind an in-flight request instead
    /// of failing with [`SessionError::Busy`].
    fn request(
        &self,
        message: &HostMessage,
        wait_idle: bool,
    ) -> Result<DebuggerMessage, SessionError> {
        self.claim(wait_idle)?;
        let result = self.send(message).and_then(|()| self.wait_reply());
        {
            let mut state = self.shared.lock();
            state.busy = false;
        }
        self.shared.changed.notify_all();

        let reply = result?;
        if let DebuggerMessage::Error { message } = reply {
            return Err(SessionError::Remote(message));
        }
        Ok(reply)
    }

    fn claim(&self, wait_idle: bool) -> Result<(), SessionError> {
        let mut state = self.shared.lock();
        while wait_idle && state.busy && !state.closed {
            state = self.shared.wait(state);
        }
        if state.closed {
            return Err(SessionError::Closed);
        }
        if state.busy {
            return Err(SessionError::Busy);
        }
        state.busy = true;
        Ok(())
    }

    fn send(&self, message: &HostMessage) -> Result<(), SessionError> {
        debug!(kind = message.kind(), "Sending message to agent");
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send(message)?;
        Ok(())
    }

    fn wait_reply(&self) -> Result<DebuggerMessage, SessionError> {
        let mut state = self.shared.lock();
        loop {
            if let Some(message) = state.inbox.pop_front() {
                debug!(kind = message.kind(), "Received message from agent");
                return Ok(message);
            }
            if state.closed {
                return Err(SessionError::Closed);
            }
            state = self.shared.wait(state);
        }
    }

    fn notify(&self, event: SessionEvent) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.send(event).is_err() {
            debug!("No listener for session events");
        }
    }

    /// External (1-based column, user path) to internal (0-based column,
    /// program path).
    fn to_internal(&self, path: &str, line: u32, column: u32) -> SourceLocation {
        let mapped = self.mapper.map_from_source(SourceLocation {
            path: normalize_path(path, &self.workspace),
            line,
            column,
        });
        SourceLocation {
            column: mapped.column.saturating_sub(1),
            ..mapped
        }
    }

    fn to_external(&self, path: &str, line: u32, column: u32) -> SourceLocation {
        let mapped = self.mapper.map_to_source(SourceLocation {
            path: path.to_string(),
            line,
            column: column + 1,
        });
        SourceLocation {
            path: qualify_path(&mapped.path, &self.workspace),
            ..mapped
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Session reader thread panicked");
            }
        }
    }
}

fn spawn_reader(
    stream: TcpStream,
    shared: Arc<Shared>,
    events: Sender<SessionEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = FramedReader::new(stream);
        loop {
            match reader.read_message::<DebuggerMessage>() {
                Ok(Some(message)) => {
                    shared.lock().inbox.push_back(message);
                    shared.changed.notify_all();
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Session socket failed");
                    break;
                }
            }
        }
        info!("Debug session ended");
        shared.lock().closed = true;
        shared.changed.notify_all();
        let _ = events.send(SessionEvent::Ended);
    })
}

fn expect_kind(message: &DebuggerMessage, expected: &'static str) -> Result<(), SessionError> {
    if message.kind() == expected {
        Ok(())
    } else {
        Err(unexpected(expected, message))
    }
}

fn unexpected(expected: &'static str, got: &DebuggerMessage) -> SessionError {
    SessionError::UnexpectedReply {
        expected,
        got: got.kind(),
    }
}

