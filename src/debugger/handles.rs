use std::collections::HashMap;

use crate::engine::ObjectId;
use crate::protocol::{GLOBAL_OBJECT_REF, MAX_FRAMES, OBJECT_REFS_START};

/// What a variables reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleTarget {
    /// Local scope of the frame `index` steps below the current one.
    Frame(u32),
    Object(ObjectId),
}

/// Per-pause mapping between engine objects and small integer references.
///
/// Frame handles are computed (`index + 1`) and never stored. Object handles
/// are only valid until [`HandleTable::clear`], which runs on every resume.
pub struct HandleTable {
    next: u32,
    by_id: HashMap<u32, ObjectId>,
    by_object: HashMap<ObjectId, u32>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: OBJECT_REFS_START,
            by_id: HashMap::new(),
            by_object: HashMap::new(),
        }
    }

    /// Handle for the local scope of the frame at `index`.
    pub fn frame_handle(index: u32) -> Option<u32> {
        (index < MAX_FRAMES).then_some(index + 1)
    }

    /// Bind the global object of the paused program to [`GLOBAL_OBJECT_REF`].
    pub fn anchor_global(&mut self, global: ObjectId) {
        self.by_id.insert(GLOBAL_OBJECT_REF, global);
        self.by_object.insert(global, GLOBAL_OBJECT_REF);
    }

    /// Handle for `object`, reusing the one issued earlier in this pause.
    pub fn allocate(&mut self, object: ObjectId) -> u32 {
        if let Some(id) = self.by_object.get(&object) {
            return *id;
        }
        let id = self.next;
        self.next += 1;
        self.by_id.insert(id, object);
        self.by_object.insert(object, id);
        id
    }

    pub fn resolve(&self, id: u32) -> Option<HandleTarget> {
        match id {
            0 => None,
            1..=MAX_FRAMES => Some(HandleTarget::Frame(id - 1)),
            _ => self.by_id.get(&id).copied().map(HandleTarget::Object),
        }
    }

    /// Forget every object handle. Ids keep counting up so that a handle kept
    /// past a resume can never alias a fresh object.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_object.clear();
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
