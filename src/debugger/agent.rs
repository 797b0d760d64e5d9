use std::io::{self, Read, Write};
use std::net::TcpStream;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::context::DebugContext;
use super::stepping::{RunMode, Stop, StopReason};
use crate::engine::{Engine, Event};
use crate::error::AgentError;
use crate::protocol::{
    DebuggerMessage, FramedReader, FramedWriter, HostMessage, Location, Source,
    UNRESOLVED_BREAKPOINT,
};

/// Settings delivered to the agent as its bootstrap payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Start with verbose message tracing enabled.
    #[serde(default)]
    pub trace: bool,
}

/// Command loop running inside the target.
///
/// The agent owns the engine. Each iteration runs the engine until it
/// reports an event, lets the stepper decide whether that is a stop, and if
/// so serves front-end commands until one of them resumes execution.
pub struct DebugAgent<E, R, W> {
    engine: E,
    reader: FramedReader<R>,
    writer: FramedWriter<W>,
    ctx: DebugContext,
    verbose: bool,
    connected: bool,
}

impl<E: Engine> DebugAgent<E, TcpStream, TcpStream> {
    /// Attach to an already connected session socket.
    pub fn connect(engine: E, stream: TcpStream, settings: &AgentSettings) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        Ok(Self::new(engine, reader, stream, settings))
    }
}

impl<E: Engine, R: Read, W: Write> DebugAgent<E, R, W> {
    pub fn new(engine: E, reader: R, writer: W, settings: &AgentSettings) -> Self {
        Self::from_framed(engine, FramedReader::new(reader), writer, settings)
    }

    /// Take over a reader that may already hold buffered input, such as the
    /// one used for the bootstrap exchange.
    pub fn from_framed(
        engine: E,
        reader: FramedReader<R>,
        writer: W,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            engine,
            reader,
            writer: FramedWriter::new(writer),
            ctx: DebugContext::new(),
            verbose: settings.trace,
            connected: true,
        }
    }

    pub fn context(&self) -> &DebugContext {
        &self.ctx
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Announce the agent, wait for the program to load, then debug it to
    /// completion. Returns the engine once the program has finished.
    pub fn run(mut self) -> E {
        self.send(&DebuggerMessage::Connect);
        // Nothing is paused yet; the loop ends once the front end names the
        // program (or goes away).
        self.command_loop();

        loop {
            let event = self.engine.resume(self.ctx.hooks());
            if event == Event::Finished {
                info!("Program finished");
                break;
            }
            let Some(stop) = self.ctx.on_event(&self.engine, event) else {
                continue;
            };
            self.announce(&stop);
            let mode = self.command_loop();
            self.ctx.resume(mode);
        }
        self.engine
    }

    fn announce(&mut self, stop: &Stop) {
        let message = match stop.reason {
            StopReason::ProgramLoaded => {
                let path = self
                    .engine
                    .frame(stop.frame)
                    .and_then(|info| info.unit)
                    .and_then(|unit| self.engine.code_unit(unit))
                    .map(|code| code.url)
                    .unwrap_or_default();
                info!(path = %path, "Loaded program");
                DebuggerMessage::ProgramLoaded {
                    source: Source { path },
                }
            }
            StopReason::Step => DebuggerMessage::StopOnStep,
            StopReason::Breakpoint { .. } => DebuggerMessage::StopOnBreakpoint {
                id: self
                    .ctx
                    .breakpoint_id(&self.engine, stop)
                    .unwrap_or(UNRESOLVED_BREAKPOINT),
            },
        };
        self.send(&message);
    }

    /// Serve commands until one hands control back to the engine.
    fn command_loop(&mut self) -> RunMode {
        loop {
            let Some(message) = self.receive() else {
                return RunMode::Continue;
            };
            if self.verbose {
                info!(message = ?message, "Received message");
            }

            match message {
                HostMessage::LoadProgram { path } => {
                    self.engine.set_content_path(&path);
                    return RunMode::Continue;
                }
                HostMessage::GetBreakpointsForLine { path, line, column } => {
                    let locations = self
                        .ctx
                        .breakpoints()
                        .candidates(&self.engine, &path, line, column)
                        .into_iter()
                        .map(|c| c.location)
                        .collect();
                    self.send(&DebuggerMessage::BreakpointsForLine { locations });
                }
                HostMessage::SetBreakpoint { path, line, column } => {
                    let id = self
                        .ctx
                        .breakpoints_mut()
                        .set(&mut self.engine, &path, line, column);
                    self.send(&DebuggerMessage::BreakpointSet {
                        id,
                        location: Location { line, column },
                    });
                }
                HostMessage::RemoveBreakpoint { id } => {
                    let removed = self.ctx.breakpoints_mut().remove(&mut self.engine, id);
                    self.send(&DebuggerMessage::BreakpointRemoved { id, removed });
                }
                HostMessage::GetStack { index, count } => {
                    let reply = self
                        .ctx
                        .stack(&self.engine, index, count)
                        .map(|frames| DebuggerMessage::Stack { frames });
                    self.reply(reply);
                }
                HostMessage::GetScopes { frame_id } => {
                    let reply = self
                        .ctx
                        .scopes(&self.engine, frame_id)
                        .map(|scopes| DebuggerMessage::Scopes { scopes });
                    self.reply(reply);
                }
                HostMessage::GetVariables { reference } => {
                    let reply = self
                        .ctx
                        .variables(&self.engine, reference)
                        .map(|variables| DebuggerMessage::Variables { variables });
                    self.reply(reply);
                }
                HostMessage::SetVariable {
                    reference,
                    name,
                    value,
                } => {
                    let reply = self
                        .ctx
                        .set_variable(&mut self.engine, reference, &name, &value)
                        .map(|new_value| DebuggerMessage::VariableSet { new_value });
                    self.reply(reply);
                }
                HostMessage::Next => return RunMode::StepOver,
                HostMessage::StepIn => return RunMode::StepInto,
                HostMessage::StepOut => return RunMode::StepOut,
                HostMessage::Continue => return RunMode::Continue,
                HostMessage::StartDebugLogging => self.verbose = true,
                HostMessage::StopDebugLogging => self.verbose = false,
                HostMessage::Unknown => {
                    warn!("Invalid message received, continuing execution");
                    return RunMode::Continue;
                }
            }
        }
    }

    fn reply(&mut self, result: Result<DebuggerMessage, AgentError>) {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                if let AgentError::UnknownHandle(reference) = e {
                    // Handles die on resume; whoever sent this kept one too long.
                    error!(reference, "Variables reference used outside its pause");
                } else {
                    warn!(error = %e, "Command failed");
                }
                DebuggerMessage::Error {
                    message: e.to_string(),
                }
            }
        };
        self.send(&message);
    }

    fn send(&mut self, message: &DebuggerMessage) {
        if !self.connected {
            return;
        }
        if self.verbose {
            info!(message = ?message, "Sending message");
        }
        if let Err(e) = self.writer.send(message) {
            warn!(error = %e, "Lost connection to front end, continuing without debugging");
            self.connected = false;
        }
    }

    fn receive(&mut self) -> Option<HostMessage> {
        if !self.connected {
            return None;
        }
        match self.reader.read_message() {
            Ok(Some(message)) => Some(message),
            Ok(None) => {
                info!("Front end closed the session");
                self.connected = false;
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from front end");
                self.connected = false;
                None
            }
        }
    }
}
