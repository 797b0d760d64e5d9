use tracing::{debug, trace, warn};

use crate::engine::{Engine, Event, FrameId, Hooks, Location, PendingAction};

/// Run modes for the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Continue,
    StepOver,
    StepInto,
    StepOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// First frame of the program was entered.
    ProgramLoaded,
    Step,
    Breakpoint { offset: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stop {
    pub frame: FrameId,
    pub reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused(FrameId),
}

/// Turns engine events into stops and resume commands into hooks.
///
/// All hooks are dropped whenever a frame becomes current, so a hook left
/// over from an earlier command can never produce a second stop.
pub struct Stepper {
    state: RunState,
    hooks: Hooks,
    loaded: bool,
    last_location: Option<Location>,
}

impl Stepper {
    pub fn new() -> Self {
        let mut hooks = Hooks::new();
        // The first frame entered is the program-loaded stop.
        hooks.set_enter_frame(true);
        Self {
            state: RunState::Running,
            hooks,
            loaded: false,
            last_location: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn current_frame(&self) -> Option<FrameId> {
        match self.state {
            RunState::Paused(frame) => Some(frame),
            RunState::Running => None,
        }
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Source position recorded when the current pause began.
    pub fn last_location(&self) -> Option<Location> {
        self.last_location
    }

    /// Decide whether `event` ends the current run. Returns the stop if so.
    pub fn on_event<E: Engine>(&mut self, engine: &E, event: Event) -> Option<Stop> {
        match event {
            Event::Finished => {
                self.hooks.clear();
                self.state = RunState::Running;
                None
            }
            Event::EnterFrame(frame) => {
                if !self.hooks.enter_frame() {
                    trace!(?frame, "Ignoring frame entry without enter hook");
                    return None;
                }
                let reason = if self.loaded {
                    StopReason::Step
                } else {
                    self.loaded = true;
                    StopReason::ProgramLoaded
                };
                Some(self.pause(engine, frame, reason))
            }
            Event::Step(frame) => {
                if self.hooks.action(frame) != Some(PendingAction::Step) {
                    trace!(?frame, "Ignoring step without step hook");
                    return None;
                }
                if location_of(engine, frame) == self.last_location {
                    return None;
                }
                Some(self.pause(engine, frame, StopReason::Step))
            }
            Event::Pop(frame) => {
                if self.hooks.action(frame) != Some(PendingAction::Pop) {
                    trace!(?frame, "Ignoring pop without pop hook");
                    return None;
                }
                self.hooks.remove(frame);
                match engine.frame(frame).and_then(|info| info.older) {
                    Some(caller) => {
                        debug!(?frame, ?caller, "Stepping out into caller");
                        self.hooks.install(caller, PendingAction::Step);
                    }
                    None => {
                        debug!(?frame, "Stepping out of outermost frame");
                        self.hooks.set_enter_frame(true);
                    }
                }
                None
            }
            Event::Breakpoint { frame, offset } => {
                Some(self.pause(engine, frame, StopReason::Breakpoint { offset }))
            }
        }
    }

    /// Leave the current pause, installing the hooks `mode` needs.
    pub fn resume(&mut self, mode: RunMode) {
        let RunState::Paused(frame) = self.state else {
            warn!(?mode, "Resume requested while not paused");
            return;
        };
        self.hooks.clear();
        match mode {
            RunMode::Continue => {}
            RunMode::StepOver => self.hooks.install(frame, PendingAction::Step),
            RunMode::StepInto => {
                self.hooks.install(frame, PendingAction::Step);
                self.hooks.set_enter_frame(true);
            }
            RunMode::StepOut => self.hooks.install(frame, PendingAction::Pop),
        }
        debug!(?mode, ?frame, "Resuming");
        self.state = RunState::Running;
    }

    fn pause<E: Engine>(&mut self, engine: &E, frame: FrameId, reason: StopReason) -> Stop {
        self.hooks.clear();
        self.state = RunState::Paused(frame);
        self.last_location = location_of(engine, frame);
        debug!(?frame, ?reason, location = ?self.last_location, "Paused");
        Stop { frame, reason }
    }
}

impl Default for Stepper {
    fn default() -> Self {
        Self::new()
    }
}

/// Current source position of `frame`, if it is live and has script.
pub fn location_of<E: Engine>(engine: &E, frame: FrameId) -> Option<Location> {
    let info = engine.frame(frame)?;
    engine.offset_location(info.unit?, info.offset)
}
