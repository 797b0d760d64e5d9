use engine_debugger::debugger::{AgentSettings, DebugAgent};
use engine_debugger::executor::ScriptEngine;
use engine_debugger::protocol::{
    encode_raw, DebuggerMessage, FramedReader, FramedWriter, HostMessage, Location, Source,
    GLOBAL_OBJECT_REF,
};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

const PROGRAM: &str = "# demo\n\
let items = [1, 2, 3]\n\
global total = 0\n\
function add x\n\
  set total = x\n\
end\n\
\n\
call add 5\n\
\n\
print total\n";

/// Front-end end of a connection to an agent running on its own thread.
struct Host {
    reader: FramedReader<TcpStream>,
    writer: FramedWriter<TcpStream>,
    stream: TcpStream,
    agent: JoinHandle<ScriptEngine>,
}

impl Host {
    fn start(source: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let engine = ScriptEngine::from_source("main.mod", source).unwrap();

        let agent = thread::spawn(move || {
            let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            DebugAgent::connect(engine, stream, &AgentSettings::default())
                .unwrap()
                .run()
        });

        let (stream, _) = listener.accept().unwrap();
        let mut host = Self {
            reader: FramedReader::new(stream.try_clone().unwrap()),
            writer: FramedWriter::new(stream.try_clone().unwrap()),
            stream,
            agent,
        };
        assert_eq!(host.receive(), DebuggerMessage::Connect);
        host
    }

    /// Start and load the program, leaving it paused on entry.
    fn loaded(source: &str) -> Self {
        let mut host = Self::start(source);
        let reply = host.request(HostMessage::LoadProgram {
            path: "main.mod".to_string(),
        });
        assert_eq!(
            reply,
            DebuggerMessage::ProgramLoaded {
                source: Source {
                    path: "main.mod".to_string()
                }
            }
        );
        host
    }

    fn send(&mut self, message: HostMessage) {
        self.writer.send(&message).unwrap();
    }

    fn receive(&mut self) -> DebuggerMessage {
        self.reader
            .read_message()
            .unwrap()
            .expect("agent closed the connection")
    }

    fn request(&mut self, message: HostMessage) -> DebuggerMessage {
        self.send(message);
        self.receive()
    }

    /// Hang up and wait for the program to run to completion.
    fn finish(self) -> ScriptEngine {
        let _ = self.stream.shutdown(Shutdown::Write);
        self.agent.join().unwrap()
    }
}

#[cfg(test)]
mod agent_tests {
    use super::*;

    #[test]
    fn test_breakpoint_hit_reports_id_and_stack() {
        let mut host = Host::loaded(PROGRAM);

        let reply = host.request(HostMessage::SetBreakpoint {
            path: "main.mod".to_string(),
            line: 10,
            column: 0,
        });
        assert_eq!(
            reply,
            DebuggerMessage::BreakpointSet {
                id: 1,
                location: Location { line: 10, column: 0 }
            }
        );

        assert_eq!(
            host.request(HostMessage::Continue),
            DebuggerMessage::StopOnBreakpoint { id: 1 }
        );

        let DebuggerMessage::Stack { frames } =
            host.request(HostMessage::GetStack { index: 0, count: 20 })
        else {
            panic!("expected stack reply");
        };
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, 10);
        assert_eq!(frames[0].source.as_ref().unwrap().path, "main.mod");

        host.send(HostMessage::Continue);
        let engine = host.finish();
        assert_eq!(engine.output(), ["5"]);
    }

    #[test]
    fn test_requests_before_the_first_pause_get_errors() {
        let mut host = Host::start(PROGRAM);
        let reply = host.request(HostMessage::GetVariables {
            reference: GLOBAL_OBJECT_REF,
        });
        assert!(matches!(reply, DebuggerMessage::Error { .. }));

        host.send(HostMessage::LoadProgram {
            path: "main.mod".to_string(),
        });
        assert!(matches!(host.receive(), DebuggerMessage::ProgramLoaded { .. }));
        host.send(HostMessage::Continue);
        host.finish();
    }

    #[test]
    fn test_variable_references_after_a_pause() {
        let mut host = Host::loaded(PROGRAM);
        host.request(HostMessage::SetBreakpoint {
            path: "main.mod".to_string(),
            line: 10,
            column: 0,
        });
        host.request(HostMessage::Continue);

        let DebuggerMessage::Scopes { scopes } =
            host.request(HostMessage::GetScopes { frame_id: 0 })
        else {
            panic!("expected scopes reply");
        };
        assert_eq!(scopes[0].variables_reference, 1);

        let DebuggerMessage::Variables { variables } =
            host.request(HostMessage::GetVariables { reference: 1 })
        else {
            panic!("expected variables reply");
        };
        let items = variables.iter().find(|v| v.name == "items").unwrap();
        assert_eq!(items.value, "[object Array]");
        for variable in &variables {
            let reference = variable.variables_reference;
            assert!(reference == 0 || reference >= GLOBAL_OBJECT_REF);
        }

        let DebuggerMessage::Variables { variables } =
            host.request(HostMessage::GetVariables {
                reference: GLOBAL_OBJECT_REF,
            })
        else {
            panic!("expected variables reply");
        };
        let total = variables.iter().find(|v| v.name == "total").unwrap();
        assert_eq!(total.value, "5");

        let DebuggerMessage::VariableSet { new_value } = host.request(HostMessage::SetVariable {
            reference: GLOBAL_OBJECT_REF,
            name: "total".to_string(),
            value: serde_json::json!(42),
        }) else {
            panic!("expected variableSet reply");
        };
        assert_eq!(new_value.value, "42");

        // Unknown references are answered, not fatal.
        let reply = host.request(HostMessage::GetVariables { reference: 0x7777 });
        assert!(matches!(reply, DebuggerMessage::Error { .. }));

        host.send(HostMessage::Continue);
        assert_eq!(host.finish().output(), ["42"]);
    }

    #[test]
    fn test_stepping_commands_report_stops() {
        let mut host = Host::loaded(PROGRAM);

        assert_eq!(host.request(HostMessage::Next), DebuggerMessage::StopOnStep);
        assert_eq!(host.request(HostMessage::Next), DebuggerMessage::StopOnStep);
        // Now on the call to `add`.
        assert_eq!(host.request(HostMessage::StepIn), DebuggerMessage::StopOnStep);
        let DebuggerMessage::Stack { frames } =
            host.request(HostMessage::GetStack { index: 0, count: 20 })
        else {
            panic!("expected stack reply");
        };
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "add");
        assert_eq!(frames[0].line, 5);
        assert_eq!(frames[1].line, 8);

        assert_eq!(host.request(HostMessage::StepOut), DebuggerMessage::StopOnStep);
        let DebuggerMessage::Stack { frames } =
            host.request(HostMessage::GetStack { index: 0, count: 20 })
        else {
            panic!("expected stack reply");
        };
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, 10);

        host.send(HostMessage::Continue);
        host.finish();
    }

    #[test]
    fn test_breakpoint_locations_and_removal() {
        let mut host = Host::loaded("let a = 1; let b = 2\nprint b\n");

        let reply = host.request(HostMessage::GetBreakpointsForLine {
            path: "main.mod".to_string(),
            line: 1,
            column: 0,
        });
        assert_eq!(
            reply,
            DebuggerMessage::BreakpointsForLine {
                locations: vec![Location { line: 1, column: 0 }, Location { line: 1, column: 11 }]
            }
        );

        let unresolved = host.request(HostMessage::SetBreakpoint {
            path: "main.mod".to_string(),
            line: 1,
            column: 4,
        });
        assert!(matches!(unresolved, DebuggerMessage::BreakpointSet { id: -1, .. }));

        assert_eq!(
            host.request(HostMessage::RemoveBreakpoint { id: 9 }),
            DebuggerMessage::BreakpointRemoved { id: 9, removed: false }
        );

        host.send(HostMessage::Continue);
        assert_eq!(host.finish().output(), ["2"]);
    }

    #[test]
    fn test_unknown_message_resumes_execution() {
        let mut host = Host::loaded("print 1\n");
        host.writer
            .send_raw_frame(&encode_raw(br#"{"type":"evaluate"}"#))
            .unwrap();
        assert_eq!(host.finish().output(), ["1"]);
    }

    #[test]
    fn test_lost_front_end_lets_the_program_finish() {
        let host = Host::loaded("print 1\nprint 2\n");
        assert_eq!(host.finish().output(), ["1", "2"]);
    }
}
