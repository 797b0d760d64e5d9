//! Reference engine: an interpreter for `.mod` programs that implements the
//! [`Engine`](crate::engine::Engine) debugging API.

mod engine;
mod heap;
mod runner;

pub use engine::ScriptEngine;
pub use heap::{Heap, ObjectData, GLOBAL};
pub use runner::{run_program, run_with_agent};
