use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Failures of the length-prefixed transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed length prefix {0:?}")]
    MalformedLength(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures surfaced by the front-end session runtime.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a request is already in flight on this session")]
    Busy,
    #[error("the debug session has ended")]
    Closed,
    #[error("expected \"{expected}\" message, got \"{got}\"")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },
    #[error("session start failed: {0}")]
    Handshake(Box<SessionError>),
    #[error("debuggee reported an error: {0}")]
    Remote(String),
    #[error("value {literal:?} is not a valid literal: {source}")]
    InvalidLiteral {
        literal: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while answering a single command inside the debug agent.
///
/// None of these stop the target: the agent turns them into an `error` reply.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("the program is not paused")]
    NotPaused,
    #[error("no frame at index {0}")]
    FrameNotFound(u32),
    #[error("frame index {0} exceeds the frame handle range")]
    FrameIndexOutOfRange(u32),
    #[error("unknown variables reference {0}")]
    UnknownHandle(u32),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failures loading adapter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Failures compiling a `.mod` program.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("line {line}: unknown statement {keyword:?}")]
    UnknownStatement { line: u32, keyword: String },
    #[error("line {line}: expected `{statement} NAME = VALUE`")]
    MalformedAssignment { line: u32, statement: &'static str },
    #[error("line {line}: {name:?} is not a valid name")]
    InvalidName { line: u32, name: String },
    #[error("line {line}: {text:?} is neither a JSON literal nor a name")]
    InvalidOperand { line: u32, text: String },
    #[error("line {line}: unbalanced quotes in arguments")]
    UnbalancedQuotes { line: u32 },
    #[error("line {line}: `end` without a matching `function`")]
    UnmatchedEnd { line: u32 },
    #[error("line {line}: function {name:?} is never closed with `end`")]
    UnclosedFunction { line: u32, name: String },
    #[error("line {line}: function {name:?} is already defined in this scope")]
    DuplicateFunction { line: u32, name: String },
}

/// Failures loading a program into the reference engine.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read program {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to compile {url}: {source}")]
    Parse { url: String, source: ParseError },
}
