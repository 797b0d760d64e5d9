mod agent;
mod breakpoints;
mod context;
mod handles;
mod stepping;

pub use agent::{AgentSettings, DebugAgent};
pub use breakpoints::{Breakpoint, Breakpoints, Candidate};
pub use context::{format_number, DebugContext};
pub use handles::{HandleTable, HandleTarget};
pub use stepping::{location_of, RunMode, RunState, Stepper, Stop, StopReason};
