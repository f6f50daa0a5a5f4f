//! Undo/redo stacks of frame-list snapshots.

use mockup_shared::protocol::FrameDraft;

pub type Snapshot = Vec<FrameDraft>;

#[derive(Debug, Clone, Default)]
pub struct FrameHistory {
    past: Vec<Snapshot>,
    future: Vec<Snapshot>,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the frames as they were before a change. Clears redo.
    pub fn record(&mut self, before: Snapshot) {
        self.past.push(before);
        self.future.clear();
    }

    /// Step back: returns the snapshot to restore, stashing `current`.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.past.pop()?;
        self.future.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.future.pop()?;
        self.past.push(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
