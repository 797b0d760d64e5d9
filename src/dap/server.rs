use super::protocol::{encode_dap, DapMessage, DapMessageContent};
use crate::bootstrap::{Rendezvous, SessionListener};
use crate::config::{AdapterConfig, LaunchArguments, LaunchPlan};
use crate::debugger::AgentSettings;
use crate::error::SessionError;
use crate::protocol::{Scope, StackFrame, MAX_FRAMES};
use crate::session::{
    identity_factory, MapperFactory, Session, SessionEvent, SessionOptions, StopKind,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, info, warn};

/// Only one thread of execution is ever exposed.
const THREAD_ID: u64 = 1;

struct DapOutput {
    seq: u64,
    writer: Box<dyn Write + Send>,
}

/// Shared writer for responses and events. Worker threads hold clones.
#[derive(Clone)]
pub struct DapSink {
    inner: Arc<Mutex<DapOutput>>,
}

impl DapSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DapOutput { seq: 0, writer })),
        }
    }

    fn send(&self, content: DapMessageContent) {
        let mut out = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        out.seq += 1;
        let msg = DapMessage {
            seq: out.seq,
            msg_type: content.msg_type().to_string(),
            content,
        };
        let result = encode_dap(&msg)
            .map_err(io::Error::from)
            .and_then(|bytes| {
                out.writer.write_all(&bytes)?;
                out.writer.flush()
            });
        match result {
            Ok(()) => debug!(seq = msg.seq, kind = %msg.msg_type, "Sent DAP message"),
            Err(e) => error!(error = %e, "Failed to write DAP message"),
        }
    }

    pub fn response(&self, request_seq: u64, command: &str, body: Option<Value>) {
        self.send(DapMessageContent::Response {
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body,
        });
    }

    pub fn error(&self, request_seq: u64, command: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(command, %message, "Request failed");
        self.send(DapMessageContent::Response {
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(message),
            body: None,
        });
    }

    pub fn event(&self, event: &str, body: Option<Value>) {
        self.send(DapMessageContent::Event {
            event: event.to_string(),
            body,
        });
    }

    fn output(&self, category: &str, text: String) {
        self.event("output", Some(json!({ "category": category, "output": text })));
    }
}

/// Debug Adapter Protocol front end driving one [`Session`].
pub struct DapServer<R> {
    input: R,
    sink: DapSink,
    config: AdapterConfig,
    mapper_factory: MapperFactory,
    rendezvous: Option<Rendezvous>,
    session: Option<Arc<Session>>,
    plan: Option<LaunchPlan>,
    target: Option<Child>,
    /// Ids of the resolved breakpoints per source path.
    breakpoints: HashMap<String, Vec<i64>>,
}

impl<R: BufRead> DapServer<R> {
    pub fn new(input: R, output: Box<dyn Write + Send>, config: AdapterConfig) -> Self {
        Self {
            input,
            sink: DapSink::new(output),
            config,
            mapper_factory: identity_factory(),
            rendezvous: None,
            session: None,
            plan: None,
            target: None,
            breakpoints: HashMap::new(),
        }
    }

    pub fn with_mapper_factory(mut self, factory: MapperFactory) -> Self {
        self.mapper_factory = factory;
        self
    }

    /// Read the next message. `Ok(None)` means the client closed its end.
    pub fn read_message(&mut self) -> io::Result<Option<DapMessage>> {
        loop {
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if self.input.read_line(&mut line)? == 0 {
                    return Ok(None);
                }
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some(value) = line.strip_prefix("Content-Length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            if content_length == 0 {
                warn!("DAP message without Content-Length, skipping");
                continue;
            }

            let mut buffer = vec![0u8; content_length];
            self.input.read_exact(&mut buffer)?;
            match serde_json::from_slice(&buffer) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => warn!(error = %e, "Unparsable DAP message, skipping"),
            }
        }
    }

    /// Serve requests until `disconnect` or end of input.
    pub fn run(&mut self) -> io::Result<()> {
        info!("DAP server starting");
        while let Some(msg) = self.read_message()? {
            let DapMessageContent::Request { command, arguments } = msg.content else {
                debug!("Ignoring non-request message");
                continue;
            };
            debug!(seq = msg.seq, %command, "Received request");
            let args = arguments.unwrap_or(Value::Null);

            match command.as_str() {
                "initialize" => self.handle_initialize(msg.seq, &command),
                "launch" => self.handle_launch(msg.seq, &command, args),
                "setBreakpoints" => self.handle_set_breakpoints(msg.seq, &command, &args),
                "breakpointLocations" => {
                    self.handle_breakpoint_locations(msg.seq, &command, &args)
                }
                "configurationDone" => self.handle_configuration_done(msg.seq, &command),
                "threads" => self.handle_threads(msg.seq, &command),
                "stackTrace" => self.handle_stack_trace(msg.seq, &command, &args),
                "scopes" => self.handle_scopes(msg.seq, &command, &args),
                "variables" => self.handle_variables(msg.seq, &command, &args),
                "setVariable" => self.handle_set_variable(msg.seq, &command, &args),
                "continue" => self.handle_resume(msg.seq, &command, Session::continue_execution),
                "next" => self.handle_resume(msg.seq, &command, Session::next),
                "stepIn" => self.handle_resume(msg.seq, &command, Session::step_in),
                "stepOut" => self.handle_resume(msg.seq, &command, Session::step_out),
                "disconnect" | "terminate" => {
                    self.handle_disconnect(msg.seq, &command, &args);
                    break;
                }
                _ => {
                    warn!(%command, "Unhandled DAP command");
                    self.sink
                        .error(msg.seq, &command, format!("unsupported request {}", command));
                }
            }
        }
        info!("DAP server exiting");
        Ok(())
    }

    fn session(&self, seq: u64, command: &str) -> Option<Arc<Session>> {
        let session = self.session.clone();
        if session.is_none() {
            self.sink.error(seq, command, "no program has been launched");
        }
        session
    }

    pub fn handle_initialize(&mut self, seq: u64, command: &str) {
        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsBreakpointLocationsRequest": true,
            "supportsSetVariable": true,
            "supportsTerminateRequest": true,
            "supportsStepBack": false,
            "supportsStepInTargetsRequest": false,
            "supportsFunctionBreakpoints": false,
            "supportsConditionalBreakpoints": false,
        });
        self.sink.response(seq, command, Some(body));
    }

    pub fn handle_launch(&mut self, seq: u64, command: &str, args: Value) {
        let args: LaunchArguments = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return self.sink.error(seq, command, format!("invalid launch arguments: {}", e)),
        };
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let plan = args.resolve(&self.config, &cwd);
        info!(program = %plan.program, workspace = %plan.workspace.display(), "Launching");

        match self.start_session(&plan) {
            Ok(session) => {
                self.session = Some(session);
                self.plan = Some(plan);
                self.sink.response(seq, command, None);
                // Configuration requests are only useful once the program is loaded.
                self.sink.event("initialized", None);
            }
            Err(e) => self.sink.error(seq, command, format!("failed to start debug session: {}", e)),
        }
    }

    fn start_session(&mut self, plan: &LaunchPlan) -> anyhow::Result<Arc<Session>> {
        if self.rendezvous.is_none() {
            self.rendezvous = Some(Rendezvous::start(self.config.rendezvous_port)?);
        }
        let listener = SessionListener::bind()?;
        let rendezvous_port = match &self.rendezvous {
            Some(rendezvous) => {
                rendezvous.offer(listener.port()?);
                rendezvous.port()
            }
            None => anyhow::bail!("rendezvous server is not running"),
        };

        let mut target = spawn_target(plan, rendezvous_port, &self.sink)?;
        let settings = AgentSettings { trace: plan.trace };
        let accepted = listener.accept(&settings, || match target.try_wait()? {
            Some(status) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("target exited before attaching ({})", status),
            )),
            None => Ok(()),
        });
        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                if let Err(kill) = target.kill() {
                    debug!(error = %kill, "Target already exited");
                }
                thread::spawn(move || target.wait());
                return Err(e.into());
            }
        };
        self.target = Some(target);

        let (tx, rx) = channel();
        let options = SessionOptions {
            program: plan.program.clone(),
            workspace: plan.workspace.clone(),
            trace: plan.trace,
        };
        let session = Session::start(stream, &options, &self.mapper_factory, tx)?;
        forward_events(rx, self.sink.clone());
        Ok(Arc::new(session))
    }

    pub fn handle_set_breakpoints(&mut self, seq: u64, command: &str, args: &Value) {
        let path = args
            .get("source")
            .and_then(|v| v.get("path"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let requested: Result<Vec<(u32, Option<u32>)>, String> = args
            .get("breakpoints")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|bp| -> Result<(u32, Option<u32>), String> {
                let line = u32_arg(bp, "line")?.ok_or("breakpoint without a line")?;
                Ok((line, u32_arg(bp, "column")?))
            })
            .collect();
        let requested = match requested {
            Ok(requested) => requested,
            Err(e) => return self.sink.error(seq, command, e),
        };

        let Some(session) = self.session(seq, command) else {
            return;
        };

        // The request replaces every breakpoint previously set in the file.
        for id in self.breakpoints.remove(&path).unwrap_or_default() {
            if let Err(e) = session.remove_breakpoint(id) {
                warn!(id, error = %e, "Failed to remove breakpoint");
            }
        }

        let mut ids = Vec::new();
        let mut result = Vec::new();
        for (line, column) in requested {
            match session.set_breakpoint(&path, line, column) {
                Ok(bp) => {
                    if bp.verified() {
                        ids.push(bp.id);
                    }
                    result.push(json!({
                        "id": bp.id,
                        "verified": bp.verified(),
                        "line": bp.location.line,
                        "column": bp.location.column,
                        "source": source_json(&bp.location.path),
                    }));
                }
                Err(e) => return self.sink.error(seq, command, e.to_string()),
            }
        }
        self.breakpoints.insert(path, ids);
        self.sink
            .response(seq, command, Some(json!({ "breakpoints": result })));
    }

    pub fn handle_breakpoint_locations(&mut self, seq: u64, command: &str, args: &Value) {
        let Some(session) = self.session(seq, command) else {
            return;
        };
        let path = args
            .get("source")
            .and_then(|v| v.get("path"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let line = match u32_arg(args, "line") {
            Ok(line) => line.unwrap_or(1),
            Err(e) => return self.sink.error(seq, command, e),
        };

        match session.breakpoint_locations(path, line) {
            Ok(locations) => {
                let breakpoints: Vec<Value> = locations
                    .iter()
                    .map(|l| json!({ "line": l.line, "column": l.column }))
                    .collect();
                self.sink
                    .response(seq, command, Some(json!({ "breakpoints": breakpoints })));
            }
            Err(e) => self.sink.error(seq, command, e.to_string()),
        }
    }

    pub fn handle_configuration_done(&mut self, seq: u64, command: &str) {
        self.sink.response(seq, command, None);
        let stop_on_entry = self.plan.as_ref().map_or(true, |plan| plan.stop_on_entry);
        if stop_on_entry {
            self.sink.event(
                "stopped",
                Some(json!({
                    "reason": "entry",
                    "threadId": THREAD_ID,
                    "allThreadsStopped": true
                })),
            );
        } else if let Some(session) = self.session.clone() {
            spawn_resume(session, self.sink.clone(), Session::continue_execution);
        }
    }

    pub fn handle_threads(&mut self, seq: u64, command: &str) {
        self.sink.response(
            seq,
            command,
            Some(json!({
                "threads": [
                    {
                        "id": THREAD_ID,
                        "name": "main"
                    }
                ]
            })),
        );
    }

    pub fn handle_stack_trace(&mut self, seq: u64, command: &str, args: &Value) {
        let Some(session) = self.session(seq, command) else {
            return;
        };
        let range = u32_arg(args, "startFrame")
            .and_then(|start| Ok((start, u32_arg(args, "levels")?)));
        let (start, levels) = match range {
            Ok((start, levels)) => (start.unwrap_or(0), levels.unwrap_or(0)),
            Err(e) => return self.sink.error(seq, command, e),
        };
        let levels = if levels == 0 { MAX_FRAMES } else { levels };

        match session.stack(start, levels) {
            Ok(frames) => {
                let total = frames.len();
                let frames: Vec<Value> = frames.iter().map(frame_json).collect();
                self.sink.response(
                    seq,
                    command,
                    Some(json!({
                        "stackFrames": frames,
                        "totalFrames": total
                    })),
                );
            }
            Err(e) => self.sink.error(seq, command, e.to_string()),
        }
    }

    pub fn handle_scopes(&mut self, seq: u64, command: &str, args: &Value) {
        let Some(session) = self.session(seq, command) else {
            return;
        };
        let frame_id = match u32_arg(args, "frameId") {
            Ok(frame_id) => frame_id.unwrap_or(0),
            Err(e) => return self.sink.error(seq, command, e),
        };
        match session.scopes(frame_id) {
            Ok(scopes) => {
                let scopes: Vec<Value> = scopes.iter().map(scope_json).collect();
                self.sink
                    .response(seq, command, Some(json!({ "scopes": scopes })));
            }
            Err(e) => self.sink.error(seq, command, e.to_string()),
        }
    }

    pub fn handle_variables(&mut self, seq: u64, command: &str, args: &Value) {
        let Some(session) = self.session(seq, command) else {
            return;
        };
        let reference = match u32_arg(args, "variablesReference") {
            Ok(reference) => reference.unwrap_or(0),
            Err(e) => return self.sink.error(seq, command, e),
        };
        match session.variables(reference) {
            Ok(variables) => self
                .sink
                .response(seq, command, Some(json!({ "variables": variables }))),
            Err(e) => self.sink.error(seq, command, e.to_string()),
        }
    }

    pub fn handle_set_variable(&mut self, seq: u64, command: &str, args: &Value) {
        let Some(session) = self.session(seq, command) else {
            return;
        };
        let reference = match u32_arg(args, "variablesReference") {
            Ok(reference) => reference.unwrap_or(0),
            Err(e) => return self.sink.error(seq, command, e),
        };
        let name = args.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let value = args.get("value").and_then(|v| v.as_str()).unwrap_or("");

        match session.set_variable(reference, name, value) {
            Ok(variable) => self.sink.response(
                seq,
                command,
                Some(json!({
                    "value": variable.value,
                    "type": variable.type_name,
                    "variablesReference": variable.variables_reference
                })),
            ),
            Err(e) => self.sink.error(seq, command, e.to_string()),
        }
    }

    /// Acknowledge at once; the stop is reported by a `stopped` event when
    /// the agent pauses again.
    pub fn handle_resume(
        &mut self,
        seq: u64,
        command: &str,
        op: fn(&Session) -> Result<StopKind, SessionError>,
    ) {
        let Some(session) = self.session(seq, command) else {
            return;
        };
        let body = (command == "continue").then(|| json!({ "allThreadsContinued": true }));
        self.sink.response(seq, command, body);
        spawn_resume(session, self.sink.clone(), op);
    }

    pub fn handle_disconnect(&mut self, seq: u64, command: &str, args: &Value) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        let terminate = command == "terminate"
            || args
                .get("terminateDebuggee")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
        if let Some(mut target) = self.target.take() {
            if terminate {
                if let Err(e) = target.kill() {
                    debug!(error = %e, "Target already exited");
                }
            }
            // Reap in the background so the target is never left a zombie.
            thread::spawn(move || target.wait());
        }
        self.sink.response(seq, command, None);
    }
}

fn spawn_target(plan: &LaunchPlan, rendezvous_port: u16, sink: &DapSink) -> io::Result<Child> {
    let executable = match &plan.executable {
        Some(executable) => executable.clone(),
        None => std::env::current_exe()?,
    };
    info!(executable = %executable.display(), "Starting target");

    let mut child = Command::new(&executable)
        .args(&plan.args)
        .arg(&plan.program)
        .current_dir(&plan.workspace)
        .env(&plan.port_env, rendezvous_port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;

    if let Some(stdout) = child.stdout.take() {
        let sink = sink.clone();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => sink.output("stdout", format!("{}\n", line)),
                    Err(_) => break,
                }
            }
        });
    }
    Ok(child)
}

fn spawn_resume(
    session: Arc<Session>,
    sink: DapSink,
    op: fn(&Session) -> Result<StopKind, SessionError>,
) {
    thread::spawn(move || match op(&session) {
        Ok(stop) => debug!(?stop, "Target stopped"),
        // The session-ended event reports this one.
        Err(SessionError::Closed) => debug!("Target finished while running"),
        Err(e) => sink.output("stderr", format!("{}\n", e)),
    });
}

/// Turn session notifications into DAP events until the session ends.
fn forward_events(events: Receiver<SessionEvent>, sink: DapSink) {
    thread::spawn(move || {
        for event in events {
            match event {
                SessionEvent::ProgramLoaded { path } => {
                    sink.output("console", format!("Loaded {}\n", path));
                }
                SessionEvent::Stopped(StopKind::Step) => sink.event(
                    "stopped",
                    Some(json!({
                        "reason": "step",
                        "threadId": THREAD_ID,
                        "allThreadsStopped": true
                    })),
                ),
                SessionEvent::Stopped(StopKind::Breakpoint(id)) => sink.event(
                    "stopped",
                    Some(json!({
                        "reason": "breakpoint",
                        "threadId": THREAD_ID,
                        "allThreadsStopped": true,
                        "hitBreakpointIds": [id]
                    })),
                ),
                SessionEvent::Ended => {
                    sink.event("terminated", None);
                    break;
                }
            }
        }
    });
}

/// Integer argument `key` of a request. Values that do not fit a `u32`
/// are rejected rather than truncated.
fn u32_arg(args: &Value, key: &str) -> Result<Option<u32>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                format!("{} must be an integer from 0 to {}, got {}", key, u32::MAX, value)
            }),
    }
}

fn source_json(path: &str) -> Value {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    json!({ "name": name, "path": path })
}

fn scope_json(scope: &Scope) -> Value {
    let mut value = json!({
        "name": scope.name,
        "presentationHint": scope.presentation_hint,
        "variablesReference": scope.variables_reference,
        "expensive": scope.expensive,
    });
    if let Some(source) = &scope.source {
        value["source"] = source_json(&source.path);
    }
    if let Some(line) = scope.line {
        value["line"] = json!(line);
    }
    if let Some(column) = scope.column {
        value["column"] = json!(column);
    }
    if let Some(end_line) = scope.end_line {
        value["endLine"] = json!(end_line);
    }
    value
}

fn frame_json(frame: &StackFrame) -> Value {
    let mut value = json!({
        "id": frame.id,
        "name": frame.name,
        "line": frame.line,
        "column": frame.column,
    });
    if let Some(source) = &frame.source {
        value["source"] = source_json(&source.path);
    }
    value
}
