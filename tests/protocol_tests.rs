use engine_debugger::protocol::{
    encode, encode_raw, DebuggerMessage, FrameDecoder, FramedReader, HostMessage, Location, Scope,
    Source, StackFrame, Variable,
};
use proptest::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::Cursor;

#[cfg(test)]
mod codec_tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = encode(&HostMessage::Continue).unwrap();
        assert_eq!(frame, b"19\n{\"type\":\"continue\"}".to_vec());
    }

    #[test]
    fn test_surplus_bytes_start_the_next_frame() {
        let mut bytes = encode(&HostMessage::Next).unwrap();
        bytes.extend(encode(&HostMessage::StepIn).unwrap());
        let cut = bytes.len() - 3;

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..cut]);
        assert_eq!(decoder.next_message::<HostMessage>(), Some(HostMessage::Next));
        assert_eq!(decoder.next_message::<HostMessage>(), None);
        decoder.extend(&bytes[cut..]);
        assert_eq!(decoder.next_message::<HostMessage>(), Some(HostMessage::StepIn));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_malformed_length_line_is_skipped() {
        let mut bytes = b"garbage\n".to_vec();
        bytes.extend(encode(&HostMessage::StepOut).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_message::<HostMessage>(), Some(HostMessage::StepOut));
    }

    #[test]
    fn test_bad_json_payload_is_skipped() {
        let mut bytes = encode_raw(b"{not json");
        bytes.extend(encode(&DebuggerMessage::StopOnStep).unwrap());

        let mut reader = FramedReader::new(Cursor::new(bytes));
        let message: Option<DebuggerMessage> = reader.read_message().unwrap();
        assert_eq!(message, Some(DebuggerMessage::StopOnStep));
        assert_eq!(reader.read_message::<DebuggerMessage>().unwrap(), None);
    }

    #[test]
    fn test_unknown_message_type_is_tolerated() {
        let frame = encode_raw(br#"{"type":"evaluate","expr":"1"}"#);
        let mut reader = FramedReader::new(Cursor::new(frame));
        assert_eq!(
            reader.read_message::<HostMessage>().unwrap(),
            Some(HostMessage::Unknown)
        );
    }

    #[test]
    fn test_closed_stream_mid_frame_ends_cleanly() {
        let frame = encode(&DebuggerMessage::Connect).unwrap();
        let mut reader = FramedReader::new(Cursor::new(frame[..frame.len() - 1].to_vec()));
        assert_eq!(reader.read_frame().unwrap(), None);
    }
}

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn name() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,8}"
}

fn path() -> impl Strategy<Value = String> {
    "[a-z/]{1,12}\\.mod"
}

fn host_message() -> impl Strategy<Value = HostMessage> {
    prop_oneof![
        prop_oneof![
            Just(HostMessage::StartDebugLogging),
            Just(HostMessage::StopDebugLogging),
            Just(HostMessage::Continue),
            Just(HostMessage::Next),
            Just(HostMessage::StepIn),
            Just(HostMessage::StepOut),
            Just(HostMessage::Unknown),
        ],
        prop_oneof![
            path().prop_map(|path| HostMessage::LoadProgram { path }),
            (path(), 1u32..500, 0u32..80).prop_map(|(path, line, column)| {
                HostMessage::SetBreakpoint { path, line, column }
            }),
            (path(), 1u32..500, 0u32..80).prop_map(|(path, line, column)| {
                HostMessage::GetBreakpointsForLine { path, line, column }
            }),
            any::<i64>().prop_map(|id| HostMessage::RemoveBreakpoint { id }),
            (0u32..10, 1u32..20).prop_map(|(index, count)| HostMessage::GetStack { index, count }),
            any::<u32>().prop_map(|frame_id| HostMessage::GetScopes { frame_id }),
            any::<u32>().prop_map(|reference| HostMessage::GetVariables { reference }),
            (any::<u32>(), name(), json_value()).prop_map(|(reference, name, value)| {
                HostMessage::SetVariable {
                    reference,
                    name,
                    value,
                }
            }),
        ],
    ]
}

fn location() -> impl Strategy<Value = Location> {
    (1u32..500, 0u32..80).prop_map(|(line, column)| Location { line, column })
}

fn variable() -> impl Strategy<Value = Variable> {
    (name(), "[ -~]{0,16}", "[A-Z][a-z]{0,8}", any::<u32>()).prop_map(
        |(name, value, type_name, variables_reference)| Variable {
            name,
            value,
            type_name,
            variables_reference,
        },
    )
}

fn scope() -> impl Strategy<Value = Scope> {
    (
        (name(), name(), any::<u32>(), any::<bool>()),
        (
            prop::option::of(path()),
            prop::option::of(1u32..500),
            prop::option::of(0u32..80),
            prop::option::of(1u32..500),
        ),
    )
        .prop_map(
            |((name, presentation_hint, variables_reference, expensive), (path, line, column, end_line))| {
                Scope {
                    name,
                    presentation_hint,
                    variables_reference,
                    expensive,
                    source: path.map(|path| Source { path }),
                    line,
                    column,
                    end_line,
                }
            },
        )
}

fn stack_frame() -> impl Strategy<Value = StackFrame> {
    (0u32..100, name(), prop::option::of(path()), 1u32..500, 0u32..80).prop_map(
        |(id, name, path, line, column)| StackFrame {
            id,
            name,
            source: path.map(|path| Source { path }),
            line,
            column,
        },
    )
}

fn debugger_message() -> impl Strategy<Value = DebuggerMessage> {
    prop_oneof![
        prop_oneof![
            Just(DebuggerMessage::Connect),
            Just(DebuggerMessage::StopOnStep),
            any::<i64>().prop_map(|id| DebuggerMessage::StopOnBreakpoint { id }),
            "[ -~]{0,24}".prop_map(|message| DebuggerMessage::Error { message }),
            path().prop_map(|path| DebuggerMessage::ProgramLoaded {
                source: Source { path }
            }),
            (any::<i64>(), location())
                .prop_map(|(id, location)| DebuggerMessage::BreakpointSet { id, location }),
        ],
        prop_oneof![
            (any::<i64>(), any::<bool>())
                .prop_map(|(id, removed)| DebuggerMessage::BreakpointRemoved { id, removed }),
            prop::collection::vec(location(), 0..4)
                .prop_map(|locations| DebuggerMessage::BreakpointsForLine { locations }),
            prop::collection::vec(stack_frame(), 0..4)
                .prop_map(|frames| DebuggerMessage::Stack { frames }),
            prop::collection::vec(scope(), 0..3)
                .prop_map(|scopes| DebuggerMessage::Scopes { scopes }),
            prop::collection::vec(variable(), 0..4)
                .prop_map(|variables| DebuggerMessage::Variables { variables }),
            variable().prop_map(|new_value| DebuggerMessage::VariableSet { new_value }),
        ],
    ]
}

/// Encode `messages`, feed the bytes in `chunk`-sized pieces and collect
/// what comes out.
fn decode_in_chunks<T>(messages: &[T], chunk: usize) -> (Vec<T>, usize)
where
    T: Serialize + DeserializeOwned,
{
    let mut bytes = Vec::new();
    for message in messages {
        bytes.extend(encode(message).unwrap());
    }

    let mut decoder = FrameDecoder::new();
    let mut decoded = Vec::new();
    for piece in bytes.chunks(chunk) {
        decoder.extend(piece);
        while let Some(message) = decoder.next_message::<T>() {
            decoded.push(message);
        }
    }
    (decoded, decoder.buffered())
}

proptest! {
    #[test]
    fn prop_host_messages_survive_any_chunking(
        messages in prop::collection::vec(host_message(), 1..8),
        chunk in 1usize..64,
    ) {
        let (decoded, leftover) = decode_in_chunks(&messages, chunk);
        prop_assert_eq!(decoded, messages);
        prop_assert_eq!(leftover, 0);
    }

    #[test]
    fn prop_debugger_messages_survive_any_chunking(
        messages in prop::collection::vec(debugger_message(), 1..8),
        chunk in 1usize..64,
    ) {
        let (decoded, leftover) = decode_in_chunks(&messages, chunk);
        prop_assert_eq!(decoded, messages);
        prop_assert_eq!(leftover, 0);
    }
}
