//! Wire protocol spoken between the front end and the in-target debug agent.
//!
//! Every message is a JSON object framed as `<byte length>\n<payload>`.

pub mod codec;
mod messages;

pub use codec::{encode, encode_raw, FrameDecoder, FramedReader, FramedWriter};
pub use messages::{
    DebuggerMessage, HostMessage, Location, Scope, Source, StackFrame, Variable,
    GLOBAL_OBJECT_REF, MAX_FRAMES, OBJECT_REFS_START, UNRESOLVED_BREAKPOINT,
};
