use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Highest frame-scope handle. Handles `1..=MAX_FRAMES` address stack frames.
pub const MAX_FRAMES: u32 = 0xfff;
/// Handle for the global scope of the paused program.
pub const GLOBAL_OBJECT_REF: u32 = MAX_FRAMES + 1;
/// First handle handed out for objects discovered during a pause.
pub const OBJECT_REFS_START: u32 = GLOBAL_OBJECT_REF + 1;
/// Breakpoint id reported when a request could not be resolved.
pub const UNRESOLVED_BREAKPOINT: i64 = -1;

/// A position inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub presentation_hint: String,
    pub variables_reference: u32,
    pub expensive: bool,
    /// File the scope's code lives in; `line`, `column` and `end_line`
    /// refer to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

/// A formatted value as shown in a variables view.
///
/// `variables_reference` is `0` for values without children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub variables_reference: u32,
}

/// Messages sent by the debug agent running inside the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DebuggerMessage {
    Connect,
    ProgramLoaded {
        source: Source,
    },
    BreakpointSet {
        id: i64,
        location: Location,
    },
    BreakpointRemoved {
        id: i64,
        removed: bool,
    },
    BreakpointsForLine {
        locations: Vec<Location>,
    },
    Stack {
        frames: Vec<StackFrame>,
    },
    Scopes {
        scopes: Vec<Scope>,
    },
    Variables {
        variables: Vec<Variable>,
    },
    VariableSet {
        #[serde(rename = "newValue")]
        new_value: Variable,
    },
    StopOnStep,
    StopOnBreakpoint {
        id: i64,
    },
    Error {
        message: String,
    },
}

impl DebuggerMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            DebuggerMessage::Connect => "connect",
            DebuggerMessage::ProgramLoaded { .. } => "programLoaded",
            DebuggerMessage::BreakpointSet { .. } => "breakpointSet",
            DebuggerMessage::BreakpointRemoved { .. } => "breakpointRemoved",
            DebuggerMessage::BreakpointsForLine { .. } => "breakpointsForLine",
            DebuggerMessage::Stack { .. } => "stack",
            DebuggerMessage::Scopes { .. } => "scopes",
            DebuggerMessage::Variables { .. } => "variables",
            DebuggerMessage::VariableSet { .. } => "variableSet",
            DebuggerMessage::StopOnStep => "stopOnStep",
            DebuggerMessage::StopOnBreakpoint { .. } => "stopOnBreakpoint",
            DebuggerMessage::Error { .. } => "error",
        }
    }
}

/// Messages sent by the front end to the debug agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    StartDebugLogging,
    StopDebugLogging,
    LoadProgram {
        path: String,
    },
    Continue,
    Next,
    StepIn,
    StepOut,
    SetBreakpoint {
        path: String,
        line: u32,
        column: u32,
    },
    RemoveBreakpoint {
        id: i64,
    },
    GetStack {
        index: u32,
        count: u32,
    },
    GetScopes {
        #[serde(rename = "frameId")]
        frame_id: u32,
    },
    GetVariables {
        reference: u32,
    },
    SetVariable {
        reference: u32,
        name: String,
        value: Value,
    },
    GetBreakpointsForLine {
        path: String,
        line: u32,
        column: u32,
    },
    /// Any message type this agent does not know about.
    #[serde(other)]
    Unknown,
}

impl HostMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::StartDebugLogging => "startDebugLogging",
            HostMessage::StopDebugLogging => "stopDebugLogging",
            HostMessage::LoadProgram { .. } => "loadProgram",
            HostMessage::Continue => "continue",
            HostMessage::Next => "next",
            HostMessage::StepIn => "stepIn",
            HostMessage::StepOut => "stepOut",
            HostMessage::SetBreakpoint { .. } => "setBreakpoint",
            HostMessage::RemoveBreakpoint { .. } => "removeBreakpoint",
            HostMessage::GetStack { .. } => "getStack",
            HostMessage::GetScopes { .. } => "getScopes",
            HostMessage::GetVariables { .. } => "getVariables",
            HostMessage::SetVariable { .. } => "setVariable",
            HostMessage::GetBreakpointsForLine { .. } => "getBreakpointsForLine",
            HostMessage::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_use_inline_type_tag() {
        let msg = DebuggerMessage::StopOnBreakpoint { id: 3 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "stopOnBreakpoint", "id": 3})
        );

        let msg = HostMessage::GetScopes { frame_id: 2 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "getScopes", "frameId": 2})
        );
    }

    #[test]
    fn unknown_host_message_decodes_to_unknown() {
        let msg: HostMessage = serde_json::from_str(r#"{"type": "evaluate", "expr": "1"}"#).unwrap();
        assert_eq!(msg, HostMessage::Unknown);
    }

    #[test]
    fn set_variable_keeps_native_value() {
        let msg: HostMessage = serde_json::from_str(
            r#"{"type": "setVariable", "reference": 1, "name": "x", "value": {"a": [1, 2]}}"#,
        )
        .unwrap();
        match msg {
            HostMessage::SetVariable { value, .. } => assert_eq!(value, json!({"a": [1, 2]})),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn variable_set_uses_new_value_field() {
        let msg = DebuggerMessage::VariableSet {
            new_value: Variable {
                name: "x".to_string(),
                value: "2".to_string(),
                type_name: "Number".to_string(),
                variables_reference: 0,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["newValue"]["type"], "Number");
        assert_eq!(value["newValue"]["variablesReference"], 0);
    }
}
