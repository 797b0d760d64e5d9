use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::heap::{Heap, GLOBAL};
use crate::debugger::format_number;
use crate::engine::{
    CodeUnit, Engine, EngineError, Event, FrameId, FrameInfo, Hooks, Location, ObjectId,
    PendingAction, UnitId, Value,
};
use crate::error::LoadError;
use crate::parser::{compile, Binding, Block, Instruction, Op, Operand};

struct Unit {
    url: String,
    name: Option<String>,
    params: Vec<String>,
    declared: Vec<String>,
    start: Location,
    line_count: u32,
    instructions: Vec<Instruction>,
    parent: Option<UnitId>,
    children: Vec<UnitId>,
}

struct Activation {
    id: FrameId,
    unit: UnitId,
    pc: u32,
    bindings: Vec<(String, Value)>,
    this: Value,
    callee: Option<String>,
    accumulator: Value,
    /// Whether the frame-enter point has been passed.
    entered: bool,
    /// Whether events for the boundary at `pc` were already considered.
    boundary_seen: bool,
    pop_reported: bool,
    /// A callee is running; `pc` still points at the call.
    awaiting_return: bool,
}

impl Activation {
    fn binding_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.bindings
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

struct PendingCall {
    unit: UnitId,
    name: String,
    args: Vec<Value>,
}

/// Interpreter for `.mod` programs exposing the [`Engine`] debugging API.
pub struct ScriptEngine {
    root: PathBuf,
    url: String,
    units: Vec<Unit>,
    top_units: Vec<UnitId>,
    stack: Vec<Activation>,
    deferred: VecDeque<PendingCall>,
    heap: Heap,
    breakpoints: HashSet<(UnitId, u32)>,
    next_frame: u64,
    started: bool,
    output: Vec<String>,
    echo: bool,
}

impl ScriptEngine {
    /// Compile `source` as the program at `url`, resolving later loads
    /// against the current directory.
    pub fn from_source(url: &str, source: &str) -> Result<Self, LoadError> {
        let mut engine = Self::empty(PathBuf::from("."), url);
        engine.install(url, source)?;
        Ok(engine)
    }

    /// Load `url` relative to `root`.
    pub fn open(root: impl Into<PathBuf>, url: &str) -> Result<Self, LoadError> {
        let mut engine = Self::empty(root.into(), url);
        let source = read_program(&engine.root, url)?;
        engine.install(url, &source)?;
        Ok(engine)
    }

    fn empty(root: PathBuf, url: &str) -> Self {
        Self {
            root,
            url: url.to_string(),
            units: Vec::new(),
            top_units: Vec::new(),
            stack: Vec::new(),
            deferred: VecDeque::new(),
            heap: Heap::new(),
            breakpoints: HashSet::new(),
            next_frame: 1,
            started: false,
            output: Vec::new(),
            echo: false,
        }
    }

    /// Also write `print` output to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn is_finished(&self) -> bool {
        self.started && self.stack.is_empty() && self.deferred.is_empty()
    }

    fn install(&mut self, url: &str, source: &str) -> Result<(), LoadError> {
        let module = compile(source).map_err(|source| LoadError::Parse {
            url: url.to_string(),
            source,
        })?;
        self.units.clear();
        self.top_units.clear();
        self.breakpoints.clear();
        self.url = url.to_string();
        let unit = self.add_unit(url, module, None);
        self.top_units.push(unit);
        info!(url, units = self.units.len(), "Compiled program");
        Ok(())
    }

    fn add_unit(&mut self, url: &str, block: Block, parent: Option<UnitId>) -> UnitId {
        let id = UnitId(self.units.len() as u32);
        let declared = block.declared_names();
        self.units.push(Unit {
            url: url.to_string(),
            name: block.name,
            params: block.params,
            declared,
            start: block.start,
            line_count: block.line_count,
            instructions: block.instructions,
            parent,
            children: Vec::new(),
        });
        for function in block.functions {
            let child = self.add_unit(url, function, Some(id));
            self.units[id.0 as usize].children.push(child);
        }
        id
    }

    fn unit(&self, unit: UnitId) -> Option<&Unit> {
        self.units.get(unit.0 as usize)
    }

    fn activation(&self, frame: FrameId) -> Option<(usize, &Activation)> {
        self.stack.iter().enumerate().find(|(_, a)| a.id == frame)
    }

    fn activation_mut(&mut self, frame: FrameId) -> Option<&mut Activation> {
        self.stack.iter_mut().find(|a| a.id == frame)
    }

    /// Find a function visible from `unit`: its own nested functions first,
    /// then those of each enclosing unit.
    fn lookup_function(&self, mut unit: UnitId, name: &str) -> Option<UnitId> {
        loop {
            let data = self.unit(unit)?;
            let found = data.children.iter().copied().find(|child| {
                self.unit(*child)
                    .is_some_and(|c| c.name.as_deref() == Some(name))
            });
            if found.is_some() {
                return found;
            }
            unit = data.parent?;
        }
    }

    fn push_frame(&mut self, unit: UnitId, args: Vec<Value>, callee: Option<String>) {
        let Some(data) = self.unit(unit) else {
            return;
        };
        let mut args = args.into_iter();
        let mut bindings: Vec<(String, Value)> = data
            .params
            .iter()
            .map(|param| (param.clone(), args.next().unwrap_or(Value::Undefined)))
            .collect();
        for name in &data.declared {
            if !bindings.iter().any(|(key, _)| key == name) {
                bindings.push((name.clone(), Value::Uninitialized));
            }
        }
        let this = if data.parent.is_none() {
            Value::Object(GLOBAL)
        } else {
            Value::Undefined
        };

        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        debug!(frame = id.0, callee = ?callee, "Pushing frame");
        self.stack.push(Activation {
            id,
            unit,
            pc: 0,
            bindings,
            this,
            callee,
            accumulator: Value::Undefined,
            entered: false,
            boundary_seen: false,
            pop_reported: false,
            awaiting_return: false,
        });
    }

    fn pop_frame(&mut self) {
        if let Some(done) = self.stack.pop() {
            debug!(frame = done.id.0, "Popped frame");
        }
        if let Some(caller) = self.stack.last_mut() {
            if caller.awaiting_return {
                caller.awaiting_return = false;
                caller.pc += 1;
                caller.boundary_seen = false;
            }
        }
    }

    fn evaluate(&mut self, operand: &Operand) -> Value {
        match operand {
            Operand::Literal(json) => self.heap.import(json),
            Operand::Name(name) => self.read(name),
        }
    }

    fn read(&self, name: &str) -> Value {
        let local = self.stack.last().and_then(|top| top.binding(name));
        match local {
            Some(Value::Uninitialized) => {
                warn!(name, "Read of uninitialized binding");
                Value::Undefined
            }
            Some(value) => value.clone(),
            None => self.heap.get_value(GLOBAL, name).unwrap_or_else(|| {
                warn!(name, "Read of undefined name");
                Value::Undefined
            }),
        }
    }

    fn store(&mut self, binding: Binding, name: &str, value: Value) {
        match binding {
            Binding::Global => self.define_global(name, value),
            Binding::Let => {
                if let Some(top) = self.stack.last_mut() {
                    match top.binding_mut(name) {
                        Some(slot) => *slot = value,
                        None => top.bindings.push((name.to_string(), value)),
                    }
                }
            }
            Binding::Set => {
                let Some(top) = self.stack.last_mut() else {
                    return;
                };
                if let Some(slot) = top.binding_mut(name) {
                    *slot = value;
                } else if self.heap.get_value(GLOBAL, name).is_some() {
                    self.define_global(name, value);
                } else {
                    warn!(name, "Assignment to undeclared name, declaring it locally");
                    top.bindings.push((name.to_string(), value));
                }
            }
        }
    }

    fn define_global(&mut self, name: &str, value: Value) {
        if let Err(e) = self.heap.set(GLOBAL, name, value) {
            warn!(error = %e, "Failed to define global");
        }
    }

    /// Text written by `print`.
    pub fn display(&self, value: &Value) -> String {
        match value {
            Value::Undefined | Value::Uninitialized => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Object(object) => {
                let class = self.object_class(*object).unwrap_or_default();
                format!("[object {}]", class)
            }
        }
    }

    fn emit(&mut self, text: String) {
        if self.echo {
            println!("{}", text);
        }
        self.output.push(text);
    }

    /// Run the instruction at the top frame's `pc`.
    fn execute(&mut self) {
        let Some(top) = self.stack.last() else {
            return;
        };
        let unit = top.unit;
        let pc = top.pc;
        let Some(instruction) = self
            .unit(unit)
            .and_then(|data| data.instructions.get(pc as usize))
            .cloned()
        else {
            return;
        };

        let mut advance = true;
        match instruction.op {
            Op::Load(operand) => {
                let value = self.evaluate(&operand);
                if let Some(top) = self.stack.last_mut() {
                    top.accumulator = value;
                }
            }
            Op::Store { binding, name } => {
                let value = self
                    .stack
                    .last_mut()
                    .map(|top| std::mem::replace(&mut top.accumulator, Value::Undefined))
                    .unwrap_or(Value::Undefined);
                self.store(binding, &name, value);
            }
            Op::Print(operand) => {
                let value = self.evaluate(&operand);
                let text = self.display(&value);
                self.emit(text);
            }
            Op::Call { name, args } => match self.lookup_function(unit, &name) {
                Some(callee) => {
                    let values = args.iter().map(|arg| self.evaluate(arg)).collect();
                    if let Some(top) = self.stack.last_mut() {
                        top.awaiting_return = true;
                    }
                    advance = false;
                    self.push_frame(callee, values, Some(name));
                }
                None => warn!(name, line = instruction.location.line, "Call to unknown function"),
            },
            Op::Defer { name, args } => match self.lookup_function(unit, &name) {
                Some(callee) => {
                    let args = args.iter().map(|arg| self.evaluate(arg)).collect();
                    self.deferred.push_back(PendingCall {
                        unit: callee,
                        name,
                        args,
                    });
                }
                None => warn!(name, line = instruction.location.line, "Defer of unknown function"),
            },
            Op::Return => {
                let end = self.unit(unit).map_or(0, |data| data.instructions.len() as u32);
                if let Some(top) = self.stack.last_mut() {
                    top.pc = end;
                    top.boundary_seen = false;
                }
                advance = false;
            }
        }

        if advance {
            if let Some(top) = self.stack.last_mut() {
                if top.unit == unit && top.pc == pc {
                    top.pc += 1;
                    top.boundary_seen = false;
                }
            }
        }
    }
}

fn read_program(root: &Path, url: &str) -> Result<String, LoadError> {
    let path = root.join(url);
    fs::read_to_string(&path).map_err(|source| LoadError::Read { path, source })
}

impl Engine for ScriptEngine {
    fn resume(&mut self, hooks: &Hooks) -> Event {
        if !self.started {
            self.started = true;
            if let Some(main) = self.top_units.first().copied() {
                self.push_frame(main, Vec::new(), None);
            }
        }

        loop {
            let Some(top) = self.stack.last_mut() else {
                let Some(call) = self.deferred.pop_front() else {
                    return Event::Finished;
                };
                self.push_frame(call.unit, call.args, Some(call.name));
                continue;
            };
            let frame = top.id;

            if !top.entered {
                top.entered = true;
                if hooks.enter_frame() {
                    return Event::EnterFrame(frame);
                }
                continue;
            }

            let len = self
                .units
                .get(top.unit.0 as usize)
                .map_or(0, |data| data.instructions.len() as u32);
            if top.pc >= len {
                if !top.pop_reported && hooks.action(frame) == Some(PendingAction::Pop) {
                    top.pop_reported = true;
                    return Event::Pop(frame);
                }
                self.pop_frame();
                continue;
            }

            if !top.boundary_seen {
                top.boundary_seen = true;
                let offset = top.pc;
                if self.breakpoints.contains(&(top.unit, offset)) {
                    return Event::Breakpoint { frame, offset };
                }
                if hooks.action(frame) == Some(PendingAction::Step) {
                    return Event::Step(frame);
                }
            }

            self.execute();
        }
    }

    fn code_units(&self) -> Vec<UnitId> {
        self.top_units.clone()
    }

    fn code_unit(&self, unit: UnitId) -> Option<CodeUnit> {
        let data = self.unit(unit)?;
        Some(CodeUnit {
            url: data.url.clone(),
            start_line: data.start.line,
            start_column: data.start.column,
            line_count: data.line_count,
        })
    }

    fn child_units(&self, unit: UnitId) -> Vec<UnitId> {
        self.unit(unit)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    fn breakpoint_offsets(&self, unit: UnitId, line: u32, min_column: u32) -> Vec<u32> {
        let Some(data) = self.unit(unit) else {
            return Vec::new();
        };
        let mut previous: Option<Location> = None;
        let mut offsets = Vec::new();
        for (offset, instruction) in data.instructions.iter().enumerate() {
            let location = instruction.location;
            // Only the first instruction of a statement is an entry point.
            if previous != Some(location) && location.line == line && location.column >= min_column
            {
                offsets.push(offset as u32);
            }
            previous = Some(location);
        }
        offsets
    }

    fn offset_location(&self, unit: UnitId, offset: u32) -> Option<Location> {
        self.unit(unit)?
            .instructions
            .get(offset as usize)
            .map(|instruction| instruction.location)
    }

    fn set_breakpoint(&mut self, unit: UnitId, offset: u32) {
        self.breakpoints.insert((unit, offset));
    }

    fn clear_breakpoint(&mut self, unit: UnitId, offset: u32) {
        self.breakpoints.remove(&(unit, offset));
    }

    fn frame(&self, frame: FrameId) -> Option<FrameInfo> {
        let (index, activation) = self.activation(frame)?;
        let is_module = self
            .unit(activation.unit)
            .is_some_and(|data| data.parent.is_none());
        Some(FrameInfo {
            unit: Some(activation.unit),
            offset: activation.pc,
            kind: if is_module { "module" } else { "call" }.to_string(),
            callee: activation.callee.clone(),
            this: Some(activation.this.clone()),
            older: index
                .checked_sub(1)
                .and_then(|below| self.stack.get(below))
                .map(|a| a.id),
            older_saved: None,
        })
    }

    fn environment_names(&self, frame: FrameId) -> Vec<String> {
        self.activation(frame)
            .map(|(_, a)| a.bindings.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    fn variable(&self, frame: FrameId, name: &str) -> Option<Value> {
        self.activation(frame)?.1.binding(name).cloned()
    }

    fn set_variable(&mut self, frame: FrameId, name: &str, value: Value) -> Result<(), EngineError> {
        let activation = self
            .activation_mut(frame)
            .ok_or(EngineError::StaleFrame(frame))?;
        let slot = activation
            .binding_mut(name)
            .ok_or_else(|| EngineError::UnknownBinding(name.to_string()))?;
        *slot = value;
        Ok(())
    }

    fn global_object(&self, _unit: UnitId) -> ObjectId {
        GLOBAL
    }

    fn object_class(&self, object: ObjectId) -> Option<String> {
        self.heap.get(object).map(|data| data.class.clone())
    }

    fn own_property_names(&self, object: ObjectId) -> Vec<String> {
        self.heap
            .get(object)
            .map(|data| data.properties.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    fn own_property(&self, object: ObjectId, name: &str) -> Option<Value> {
        self.heap.get_value(object, name)
    }

    fn set_property(&mut self, object: ObjectId, name: &str, value: Value) -> Result<(), EngineError> {
        self.heap.set(object, name, value)
    }

    fn import_value(&mut self, value: &serde_json::Value) -> Value {
        self.heap.import(value)
    }

    fn set_content_path(&mut self, path: &str) {
        if path == self.url {
            return;
        }
        if self.started {
            warn!(path, "Program already running, ignoring new content path");
            return;
        }
        match read_program(&self.root, path).and_then(|source| self.install(path, &source)) {
            Ok(()) => info!(path, "Switched program"),
            Err(e) => warn!(error = %e, "Failed to load program, keeping {}", self.url),
        }
    }
}
