use tracing::info;

use super::engine::ScriptEngine;
use crate::bootstrap::AgentConnection;
use crate::debugger::DebugAgent;
use crate::engine::{Engine, Event, Hooks};

/// Run a program to completion with no debugger attached.
pub fn run_program(engine: &mut ScriptEngine) {
    let hooks = Hooks::new();
    while engine.resume(&hooks) != Event::Finished {}
    info!(url = engine.url(), lines = engine.output().len(), "Program finished");
}

/// Run a program under a debug agent on a bootstrapped connection.
pub fn run_with_agent(engine: ScriptEngine, connection: AgentConnection) -> ScriptEngine {
    let agent = DebugAgent::from_framed(
        engine,
        connection.reader,
        connection.writer,
        &connection.settings,
    );
    agent.run()
}
