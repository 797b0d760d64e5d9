use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

const BINARY: &str = env!("CARGO_BIN_EXE_engine-debug");

/// A running adapter process spoken to over its standard streams.
struct Client {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    seq: u64,
    /// Events seen while waiting for something else.
    events: Vec<Value>,
}

impl Client {
    fn spawn() -> Self {
        let mut child = Command::new(BINARY)
            .arg("adapter")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("failed to start adapter");
        let stdin = child.stdin.take().unwrap();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        Self {
            child,
            stdin,
            stdout,
            seq: 0,
            events: Vec::new(),
        }
    }

    fn send(&mut self, command: &str, arguments: Value) -> u64 {
        self.seq += 1;
        let body = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        })
        .to_string();
        write!(self.stdin, "Content-Length: {}\r\n\r\n{}", body.len(), body).unwrap();
        self.stdin.flush().unwrap();
        self.seq
    }

    fn read(&mut self) -> Value {
        let mut length = 0;
        loop {
            let mut line = String::new();
            assert!(self.stdout.read_line(&mut line).unwrap() > 0, "adapter closed stdout");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                length = value.trim().parse().unwrap();
            }
        }
        let mut body = vec![0u8; length];
        self.stdout.read_exact(&mut body).unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments);
        loop {
            let message = self.read();
            if message["type"] == "response" && message["request_seq"] == seq {
                assert_eq!(message["command"], command);
                return message;
            }
            self.events.push(message);
        }
    }

    fn event(&mut self, name: &str) -> Value {
        if let Some(index) = self.events.iter().position(|e| e["event"] == name) {
            return self.events.remove(index);
        }
        loop {
            let message = self.read();
            if message["type"] == "event" && message["event"] == name {
                return message;
            }
            self.events.push(message);
        }
    }
}

fn launch(client: &mut Client, workspace: &std::path::Path, stop_on_entry: bool) {
    let init = client.request("initialize", json!({ "adapterID": "mod" }));
    assert_eq!(init["success"], true);
    assert_eq!(init["body"]["supportsConfigurationDoneRequest"], true);

    let launched = client.request(
        "launch",
        json!({
            "program": "main.mod",
            "cwd": workspace,
            "stopOnEntry": stop_on_entry,
            "runtimeExecutable": BINARY,
            "runtimeArgs": ["run"],
        }),
    );
    assert_eq!(launched["success"], true, "launch failed: {}", launched);
    client.event("initialized");
}

#[cfg(test)]
mod dap_tests {
    use super::*;

    #[test]
    fn test_stop_on_entry_then_run_to_breakpoint() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main.mod"),
            "let greeting = \"hello\"\nprint greeting\nprint \"done\"\n",
        )
        .unwrap();
        let program = dir.path().join("main.mod").to_string_lossy().into_owned();

        let mut client = Client::spawn();
        launch(&mut client, dir.path(), true);

        let set = client.request(
            "setBreakpoints",
            json!({
                "source": { "path": program },
                "breakpoints": [{ "line": 3 }, { "line": 7 }],
            }),
        );
        let breakpoints = set["body"]["breakpoints"].as_array().unwrap();
        assert_eq!(breakpoints.len(), 2);
        assert_eq!(breakpoints[0]["verified"], true);
        assert_eq!(breakpoints[0]["line"], 3);
        assert_eq!(breakpoints[1]["verified"], false);

        assert_eq!(client.request("configurationDone", json!({}))["success"], true);
        let entry = client.event("stopped");
        assert_eq!(entry["body"]["reason"], "entry");

        let threads = client.request("threads", json!({}));
        assert_eq!(threads["body"]["threads"][0]["id"], 1);

        let trace = client.request("stackTrace", json!({ "threadId": 1 }));
        let frames = trace["body"]["stackFrames"].as_array().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["line"], 1);
        assert_eq!(frames[0]["column"], 1);
        assert_eq!(frames[0]["source"]["path"], program.as_str());

        let scopes = client.request("scopes", json!({ "frameId": 0 }));
        assert_eq!(scopes["body"]["scopes"][0]["variablesReference"], 1);

        let locals = client.request("variables", json!({ "variablesReference": 1 }));
        let greeting = &locals["body"]["variables"][0];
        assert_eq!(greeting["name"], "greeting");
        assert_eq!(greeting["value"], "<uninitialized>");

        // 2^32 + 1 must not wrap around to the locals handle.
        let wrapped = client.request("variables", json!({ "variablesReference": 4294967297u64 }));
        assert_eq!(wrapped["success"], false);
        assert!(wrapped["message"]
            .as_str()
            .unwrap()
            .contains("variablesReference must be an integer"));

        assert_eq!(client.request("continue", json!({ "threadId": 1 }))["success"], true);
        let hit = client.event("stopped");
        assert_eq!(hit["body"]["reason"], "breakpoint");
        assert_eq!(hit["body"]["hitBreakpointIds"][0], breakpoints[0]["id"]);

        let set = client.request(
            "setVariable",
            json!({ "variablesReference": 1, "name": "greeting", "value": "\"changed\"" }),
        );
        assert_eq!(set["body"]["value"], "\"changed\"");

        client.request("continue", json!({ "threadId": 1 }));
        client.event("terminated");

        let disconnect = client.request("disconnect", json!({ "terminateDebuggee": true }));
        assert_eq!(disconnect["success"], true);
        assert!(client.child.wait().unwrap().success());
    }

    #[test]
    fn test_program_output_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.mod"), "print \"hello\"\n").unwrap();

        let mut client = Client::spawn();
        launch(&mut client, dir.path(), false);
        client.request("configurationDone", json!({}));

        loop {
            let output = client.event("output");
            if output["body"]["category"] == "stdout" {
                assert_eq!(output["body"]["output"], "hello\n");
                break;
            }
        }
        client.event("terminated");
        client.request("disconnect", json!({}));
        assert!(client.child.wait().unwrap().success());
    }

    #[test]
    fn test_launch_fails_when_the_program_does_not_compile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.mod"), "bogus statement here\n").unwrap();

        let mut client = Client::spawn();
        client.request("initialize", json!({ "adapterID": "mod" }));
        let launched = client.request(
            "launch",
            json!({
                "program": "main.mod",
                "cwd": dir.path(),
                "runtimeExecutable": BINARY,
                "runtimeArgs": ["run"],
            }),
        );
        assert_eq!(launched["success"], false);
        let message = launched["message"].as_str().unwrap();
        assert!(message.contains("exited before attaching"), "{}", message);

        // The adapter keeps serving requests.
        assert_eq!(client.request("threads", json!({}))["success"], true);
        let trace = client.request("stackTrace", json!({ "threadId": 1 }));
        assert_eq!(trace["success"], false);

        client.request("disconnect", json!({}));
        assert!(client.child.wait().unwrap().success());
    }

    #[test]
    fn test_requests_before_launch_fail() {
        let mut client = Client::spawn();
        let trace = client.request("stackTrace", json!({ "threadId": 1 }));
        assert_eq!(trace["success"], false);

        let unknown = client.request("evaluate", json!({ "expression": "1" }));
        assert_eq!(unknown["success"], false);

        client.request("disconnect", json!({}));
        assert!(client.child.wait().unwrap().success());
    }
}
