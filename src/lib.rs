//! Debugger for `.mod` programs.
//!
//! A debug agent runs inside the target next to the script engine and talks
//! a length-prefixed JSON protocol to a front-end session, which in turn is
//! driven by a Debug Adapter Protocol server.

pub mod bootstrap;
pub mod config;
pub mod dap;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod parser;
pub mod protocol;
pub mod session;
