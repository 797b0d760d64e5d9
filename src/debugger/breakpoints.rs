use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use crate::engine::{Engine, Location, UnitId};
use crate::protocol::UNRESOLVED_BREAKPOINT;

/// An executable position a breakpoint could be placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub unit: UnitId,
    pub offset: u32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: i64,
    pub requested: Location,
    pub unit: UnitId,
    pub offset: u32,
}

/// Known code units per file plus every breakpoint resolved so far.
pub struct Breakpoints {
    files: HashMap<String, BTreeSet<UnitId>>,
    points: BTreeMap<i64, Breakpoint>,
    by_offset: HashMap<(UnitId, u32), i64>,
    last_id: i64,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            points: BTreeMap::new(),
            by_offset: HashMap::new(),
            last_id: 0,
        }
    }

    pub fn register_unit(&mut self, url: &str, unit: UnitId) {
        let inserted = self.files.entry(url.to_string()).or_default().insert(unit);
        if inserted {
            debug!(url, unit = unit.0, "Registered code unit");
        }
    }

    /// Register every top-level unit the engine has loaded.
    pub fn register_all<E: Engine>(&mut self, engine: &E) {
        for unit in engine.code_units() {
            if let Some(info) = engine.code_unit(unit) {
                self.register_unit(&info.url, unit);
            }
        }
    }

    pub fn knows_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Every position on `line` at or after `column` in `path`, including
    /// positions inside nested functions.
    pub fn candidates<E: Engine>(
        &self,
        engine: &E,
        path: &str,
        line: u32,
        column: u32,
    ) -> Vec<Candidate> {
        let mut found = Vec::new();
        if let Some(units) = self.files.get(path) {
            for unit in units {
                collect_candidates(engine, *unit, line, column, &mut found);
            }
        }
        found
    }

    /// Resolve and install a breakpoint. Returns its id, or
    /// [`UNRESOLVED_BREAKPOINT`] when nothing executable sits exactly at
    /// `line:column`.
    pub fn set<E: Engine>(&mut self, engine: &mut E, path: &str, line: u32, column: u32) -> i64 {
        if !self.knows_file(path) {
            info!(path, "Can't set breakpoint: no code loaded for file");
            return UNRESOLVED_BREAKPOINT;
        }

        let requested = Location { line, column };
        let Some(candidate) = self
            .candidates(engine, path, line, column)
            .into_iter()
            .find(|c| c.location == requested)
        else {
            info!(path, line, column, "No executable position at breakpoint location");
            return UNRESOLVED_BREAKPOINT;
        };

        if let Some(id) = self.by_offset.get(&(candidate.unit, candidate.offset)) {
            return *id;
        }

        engine.set_breakpoint(candidate.unit, candidate.offset);
        self.last_id += 1;
        let id = self.last_id;
        self.by_offset.insert((candidate.unit, candidate.offset), id);
        self.points.insert(
            id,
            Breakpoint {
                id,
                requested,
                unit: candidate.unit,
                offset: candidate.offset,
            },
        );
        info!(id, path, line, column, "Breakpoint set");
        id
    }

    /// Remove a breakpoint by id. Ids are not reused afterwards.
    pub fn remove<E: Engine>(&mut self, engine: &mut E, id: i64) -> bool {
        let Some(bp) = self.points.remove(&id) else {
            return false;
        };
        self.by_offset.remove(&(bp.unit, bp.offset));
        engine.clear_breakpoint(bp.unit, bp.offset);
        info!(id, "Breakpoint removed");
        true
    }

    pub fn id_at(&self, unit: UnitId, offset: u32) -> Option<i64> {
        self.by_offset.get(&(unit, offset)).copied()
    }
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_candidates<E: Engine>(
    engine: &E,
    unit: UnitId,
    line: u32,
    column: u32,
    found: &mut Vec<Candidate>,
) {
    for offset in engine.breakpoint_offsets(unit, line, column) {
        if let Some(location) = engine.offset_location(unit, offset) {
            found.push(Candidate {
                unit,
                offset,
                location,
            });
        }
    }
    for child in engine.child_units(unit) {
        collect_candidates(engine, child, line, column, found);
    }
}
