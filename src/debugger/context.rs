use super::breakpoints::Breakpoints;
use super::handles::{HandleTable, HandleTarget};
use super::stepping::{RunMode, Stepper, Stop, StopReason};
use crate::engine::{Engine, Event, FrameId, Hooks, ObjectId, Value};
use crate::error::AgentError;
use crate::protocol::{Scope, Source, StackFrame, Variable, GLOBAL_OBJECT_REF};

/// Debuggee-side state: stepping, breakpoints and the handles of the
/// current pause.
pub struct DebugContext {
    stepper: Stepper,
    breakpoints: Breakpoints,
    handles: HandleTable,
}

impl DebugContext {
    pub fn new() -> Self {
        Self {
            stepper: Stepper::new(),
            breakpoints: Breakpoints::new(),
            handles: HandleTable::new(),
        }
    }

    pub fn stepper(&self) -> &Stepper {
        &self.stepper
    }

    pub fn hooks(&self) -> &Hooks {
        self.stepper.hooks()
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn current_frame(&self) -> Result<FrameId, AgentError> {
        self.stepper.current_frame().ok_or(AgentError::NotPaused)
    }

    /// Feed one engine event through the stepper. On a stop, a new pause
    /// begins with the global object anchored in a fresh handle table.
    pub fn on_event<E: Engine>(&mut self, engine: &E, event: Event) -> Option<Stop> {
        let stop = self.stepper.on_event(engine, event)?;
        // Units may be loaded at any point; registration is idempotent.
        self.breakpoints.register_all(engine);
        self.handles.clear();
        if let Some(unit) = engine.frame(stop.frame).and_then(|info| info.unit) {
            self.handles.anchor_global(engine.global_object(unit));
        }
        Some(stop)
    }

    /// End the pause. Every object handle issued during it becomes invalid.
    pub fn resume(&mut self, mode: RunMode) {
        self.handles.clear();
        self.stepper.resume(mode);
    }

    /// Id of the breakpoint that produced `stop`, if any.
    pub fn breakpoint_id<E: Engine>(&self, engine: &E, stop: &Stop) -> Option<i64> {
        let StopReason::Breakpoint { offset } = stop.reason else {
            return None;
        };
        let unit = engine.frame(stop.frame)?.unit?;
        self.breakpoints.id_at(unit, offset)
    }

    pub fn stack<E: Engine>(
        &self,
        engine: &E,
        index: u32,
        count: u32,
    ) -> Result<Vec<StackFrame>, AgentError> {
        let mut frame = self.find_frame(engine, index)?;
        let mut id = index;
        let mut frames = Vec::new();

        while frames.len() < count as usize {
            let info = engine.frame(frame).ok_or(AgentError::FrameNotFound(id))?;
            let mut entry = StackFrame {
                id,
                name: info.callee.clone().unwrap_or_else(|| info.kind.clone()),
                source: None,
                line: 0,
                column: 0,
            };
            if let Some(unit) = info.unit {
                if let Some(code) = engine.code_unit(unit) {
                    entry.source = Some(Source { path: code.url });
                }
                if let Some(location) = engine.offset_location(unit, info.offset) {
                    entry.line = location.line;
                    entry.column = location.column;
                }
            }
            frames.push(entry);

            match info.caller() {
                Some(next) => {
                    frame = next;
                    id += 1;
                }
                None => break,
            }
        }
        Ok(frames)
    }

    pub fn scopes<E: Engine>(&self, engine: &E, index: u32) -> Result<Vec<Scope>, AgentError> {
        let frame = self.find_frame(engine, index)?;
        let reference =
            HandleTable::frame_handle(index).ok_or(AgentError::FrameIndexOutOfRange(index))?;
        let code = engine
            .frame(frame)
            .and_then(|info| info.unit)
            .and_then(|unit| engine.code_unit(unit));

        let mut locals = Scope {
            name: "Locals".to_string(),
            presentation_hint: "locals".to_string(),
            variables_reference: reference,
            expensive: false,
            source: None,
            line: None,
            column: None,
            end_line: None,
        };
        if let Some(code) = code {
            locals.source = Some(Source { path: code.url });
            locals.line = Some(code.start_line);
            locals.column = Some(code.start_column);
            locals.end_line = Some(code.start_line + code.line_count);
        }

        Ok(vec![
            locals,
            Scope {
                name: "Globals".to_string(),
                presentation_hint: "globals".to_string(),
                variables_reference: GLOBAL_OBJECT_REF,
                expensive: true,
                source: None,
                line: None,
                column: None,
                end_line: None,
            },
        ])
    }

    pub fn variables<E: Engine>(
        &mut self,
        engine: &E,
        reference: u32,
    ) -> Result<Vec<Variable>, AgentError> {
        self.current_frame()?;
        match self.handles.resolve(reference) {
            Some(HandleTarget::Object(object)) => Ok(self.members(engine, object)),
            Some(HandleTarget::Frame(index)) => {
                let frame = self.find_frame(engine, index)?;
                let mut variables = Vec::new();
                for name in engine.environment_names(frame) {
                    let value = engine.variable(frame, &name).unwrap_or(Value::Undefined);
                    variables.push(self.describe(engine, name, &value));
                }
                let this = engine.frame(frame).and_then(|info| info.this);
                if let Some(this) = this.filter(Value::is_truthy) {
                    variables.push(self.describe(engine, "<this>".to_string(), &this));
                }
                Ok(variables)
            }
            None => Err(AgentError::UnknownHandle(reference)),
        }
    }

    /// Assign `value` (a literal sent by the front end) and describe the
    /// binding as it reads back.
    pub fn set_variable<E: Engine>(
        &mut self,
        engine: &mut E,
        reference: u32,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<Variable, AgentError> {
        self.current_frame()?;
        match self.handles.resolve(reference) {
            Some(HandleTarget::Object(object)) => {
                let value = engine.import_value(value);
                engine.set_property(object, name, value)?;
                Ok(self.member(&*engine, object, name))
            }
            Some(HandleTarget::Frame(index)) => {
                let frame = self.find_frame(&*engine, index)?;
                let value = engine.import_value(value);
                engine.set_variable(frame, name, value)?;
                let current = engine.variable(frame, name).unwrap_or(Value::Undefined);
                Ok(self.describe(&*engine, name.to_string(), &current))
            }
            None => Err(AgentError::UnknownHandle(reference)),
        }
    }

    /// Walk `index` callers down from the current frame.
    fn find_frame<E: Engine>(&self, engine: &E, index: u32) -> Result<FrameId, AgentError> {
        let mut frame = self.current_frame()?;
        for _ in 0..index {
            frame = engine
                .frame(frame)
                .and_then(|info| info.caller())
                .ok_or(AgentError::FrameNotFound(index))?;
        }
        Ok(frame)
    }

    fn members<E: Engine>(&mut self, engine: &E, object: ObjectId) -> Vec<Variable> {
        engine
            .own_property_names(object)
            .into_iter()
            .map(|name| self.member(engine, object, &name))
            .collect()
    }

    fn member<E: Engine>(&mut self, engine: &E, object: ObjectId, name: &str) -> Variable {
        let value = engine.own_property(object, name).unwrap_or(Value::Undefined);
        self.describe(engine, name.to_string(), &value)
    }

    fn describe<E: Engine>(&mut self, engine: &E, name: String, value: &Value) -> Variable {
        let (value, type_name, variables_reference) = self.format(engine, value);
        Variable {
            name,
            value,
            type_name,
            variables_reference,
        }
    }

    /// Display text, type name and handle for a value. Objects get a handle
    /// so the front end can expand them.
    fn format<E: Engine>(&mut self, engine: &E, value: &Value) -> (String, String, u32) {
        match value {
            Value::Undefined => ("undefined".to_string(), "Undefined".to_string(), 0),
            Value::Null => ("null".to_string(), "Null".to_string(), 0),
            Value::Bool(b) => (b.to_string(), "Boolean".to_string(), 0),
            Value::Number(n) => (format_number(*n), "Number".to_string(), 0),
            Value::String(s) => (format!("\"{}\"", s), "String".to_string(), 0),
            Value::Uninitialized => (
                "<uninitialized>".to_string(),
                "Uninitialized Binding".to_string(),
                0,
            ),
            Value::Object(object) => {
                let class = engine
                    .object_class(*object)
                    .unwrap_or_else(|| "Object".to_string());
                let handle = self.handles.allocate(*object);
                (format!("[object {}]", class), class, handle)
            }
        }
    }
}

impl Default for DebugContext {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
