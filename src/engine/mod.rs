//! The native debugger surface a debug agent drives.
//!
//! An [`Engine`] owns the running program. The agent never holds frames or
//! objects directly; it holds ids the engine resolves, and a frame id stops
//! resolving once the frame has popped.

use std::collections::BTreeMap;

use thiserror::Error;

pub use crate::protocol::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u32);

/// A value living inside the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectId),
    /// A declared binding that has not been initialized yet.
    Uninitialized,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null | Value::Uninitialized => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }
}

/// A compiled unit of source: a module or a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    pub url: String,
    pub start_line: u32,
    pub start_column: u32,
    pub line_count: u32,
}

/// Snapshot of one activation record.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// `None` for frames without script, such as native calls.
    pub unit: Option<UnitId>,
    pub offset: u32,
    /// Engine-specific frame kind, shown when there is no callee name.
    pub kind: String,
    pub callee: Option<String>,
    pub this: Option<Value>,
    pub older: Option<FrameId>,
    /// Caller reconstructed from a saved stack, e.g. across async boundaries.
    pub older_saved: Option<FrameId>,
}

impl FrameInfo {
    /// The frame that is displayed below this one.
    pub fn caller(&self) -> Option<FrameId> {
        self.older.or(self.older_saved)
    }
}

/// Something the engine stopped for while running under [`Engine::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A frame was pushed and its first instruction has not run yet.
    EnterFrame(FrameId),
    /// A frame carrying a step hook is about to run its next instruction.
    Step(FrameId),
    /// A frame carrying a pop hook is returning. It is still inspectable.
    Pop(FrameId),
    Breakpoint { frame: FrameId, offset: u32 },
    Finished,
}

/// Per-frame hook installed by the stepping logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Step,
    Pop,
}

/// Hook side table the engine consults while running.
///
/// Breakpoints are not part of it; they live on the engine per offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    enter_frame: bool,
    actions: BTreeMap<FrameId, PendingAction>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_frame(&self) -> bool {
        self.enter_frame
    }

    pub fn set_enter_frame(&mut self, enabled: bool) {
        self.enter_frame = enabled;
    }

    pub fn action(&self, frame: FrameId) -> Option<PendingAction> {
        self.actions.get(&frame).copied()
    }

    pub fn install(&mut self, frame: FrameId, action: PendingAction) {
        self.actions.insert(frame, action);
    }

    pub fn remove(&mut self, frame: FrameId) -> Option<PendingAction> {
        self.actions.remove(&frame)
    }

    /// Drop every per-frame hook, keeping the enter hook.
    pub fn clear_frames(&mut self) {
        self.actions.clear();
    }

    pub fn clear(&mut self) {
        self.enter_frame = false;
        self.actions.clear();
    }

    pub fn is_empty(&self) -> bool {
        !self.enter_frame && self.actions.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("frame {0:?} is no longer on the stack")]
    StaleFrame(FrameId),
    #[error("unknown object {0:?}")]
    UnknownObject(ObjectId),
    #[error("no binding named {0:?} in scope")]
    UnknownBinding(String),
}

/// Native debugging API of a script engine.
pub trait Engine {
    /// Run until an event selected by `hooks` (or a breakpoint) occurs.
    ///
    /// Calling `resume` again continues exactly where the previous call
    /// stopped; an instruction boundary is never reported twice.
    fn resume(&mut self, hooks: &Hooks) -> Event;

    /// Every top-level code unit currently loaded.
    fn code_units(&self) -> Vec<UnitId>;
    fn code_unit(&self, unit: UnitId) -> Option<CodeUnit>;
    fn child_units(&self, unit: UnitId) -> Vec<UnitId>;
    /// Offsets in `unit` (not its children) where a breakpoint can be placed
    /// on `line`, at or after `min_column`.
    fn breakpoint_offsets(&self, unit: UnitId, line: u32, min_column: u32) -> Vec<u32>;
    fn offset_location(&self, unit: UnitId, offset: u32) -> Option<Location>;
    fn set_breakpoint(&mut self, unit: UnitId, offset: u32);
    fn clear_breakpoint(&mut self, unit: UnitId, offset: u32);

    fn frame(&self, frame: FrameId) -> Option<FrameInfo>;
    fn environment_names(&self, frame: FrameId) -> Vec<String>;
    fn variable(&self, frame: FrameId, name: &str) -> Option<Value>;
    fn set_variable(&mut self, frame: FrameId, name: &str, value: Value) -> Result<(), EngineError>;

    fn global_object(&self, unit: UnitId) -> ObjectId;
    fn object_class(&self, object: ObjectId) -> Option<String>;
    fn own_property_names(&self, object: ObjectId) -> Vec<String>;
    fn own_property(&self, object: ObjectId, name: &str) -> Option<Value>;
    fn set_property(&mut self, object: ObjectId, name: &str, value: Value) -> Result<(), EngineError>;

    /// Build a native value from a JSON literal sent by the front end.
    fn import_value(&mut self, value: &serde_json::Value) -> Value;

    /// Select the program the engine loads as its main module.
    fn set_content_path(&mut self, path: &str);
}
