//! Per-generation frame splitter.
//!
//! A [`GenerationContext`] owns everything one generation needs to turn a
//! streamed model response into frames: the marker filter, the block
//! scanner, the accumulated text, the frame identifiers allocated so far and
//! the emission throttle. Nothing is shared between generations, so any
//! number of them can run side by side.
//!
//! In creation mode one placeholder frame exists from the start and more
//! are allocated as further blocks appear; identifiers are never dropped.
//! In edit mode the single target frame receives the first block (or the
//! raw text when there is none).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::constants::{EMIT_THROTTLE_MS, MARKUP_START_TOKENS};
use crate::markers::{Marker, MarkerFilter, Segment};
use crate::scanner::BlockScanner;
use crate::types::{FrameId, FrameSeed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// No edit target; frames are allocated as blocks are detected.
    Create,
    /// Rewrite exactly one existing frame.
    Edit(FrameId),
}

/// Content currently assigned to one frame identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameContent {
    pub id: FrameId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitEvent {
    Started,
    /// Latest content for every allocated frame, in allocation order.
    FramesUpdated(Vec<FrameContent>),
    CreditsDeducted(u64),
    /// Terminal; nothing further is processed.
    Failed(String),
}

/// Minimum-interval gate for content emissions.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` (and restarts the window) when an emission is allowed.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(Duration::from_millis(EMIT_THROTTLE_MS))
    }
}

#[derive(Debug)]
pub struct GenerationContext {
    mode: Mode,
    markers: MarkerFilter,
    scanner: BlockScanner,
    text: String,
    first_tag_open: Option<usize>,
    markup_seen: bool,
    frame_ids: Vec<FrameId>,
    seed: FrameSeed,
    throttle: Throttle,
    dirty: bool,
    halted: bool,
}

impl GenerationContext {
    /// Start a generation. `seed` prefixes the frame identifiers
    /// allocated in creation mode.
    pub fn new(mode: Mode, seed: FrameSeed) -> Self {
        let frame_ids = match &mode {
            Mode::Create => vec![seed.frame(0)],
            Mode::Edit(target) => vec![target.clone()],
        };

        Self {
            mode,
            markers: MarkerFilter::new(),
            scanner: BlockScanner::new(),
            text: String::new(),
            first_tag_open: None,
            markup_seen: false,
            frame_ids,
            seed,
            throttle: Throttle::default(),
            dirty: false,
            halted: false,
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn frame_ids(&self) -> &[FrameId] {
        &self.frame_ids
    }

    /// Accumulated text with markers removed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Feed one chunk of the live stream.
    ///
    /// Every chunk is absorbed immediately; a `FramesUpdated` event is only
    /// produced when the throttle allows it.
    pub fn push(&mut self, chunk: &str, now: Instant) -> Vec<SplitEvent> {
        if self.halted {
            return Vec::new();
        }

        let mut events = Vec::new();
        for segment in self.markers.push(chunk) {
            match segment {
                Segment::Text(text) => self.absorb(&text),
                Segment::Marker(Marker::Start) => events.push(SplitEvent::Started),
                Segment::Marker(Marker::CreditsDeducted(n)) => {
                    events.push(SplitEvent::CreditsDeducted(n))
                }
                Segment::Marker(Marker::Error(msg)) => {
                    self.halted = true;
                    events.push(SplitEvent::Failed(msg));
                    return events;
                }
            }
        }

        if self.dirty && self.throttle.ready(now) {
            self.dirty = false;
            events.push(SplitEvent::FramesUpdated(self.contents(false)));
        }
        events
    }

    /// Append marker-free text (used where the stream carries no markers).
    pub fn absorb(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let old_len = self.text.len();
        self.text.push_str(text);
        self.scanner.push(text);

        if self.first_tag_open.is_none() {
            self.first_tag_open = text.find('<').map(|i| old_len + i);
        }
        if !self.markup_seen {
            // Re-check a few bytes before the new text so tokens split
            // across chunks are still found.
            let longest = MARKUP_START_TOKENS.iter().map(|t| t.len()).max().unwrap_or(0);
            let mut from = old_len.saturating_sub(longest);
            while !self.text.is_char_boundary(from) {
                from -= 1;
            }
            let window = &self.text[from..];
            self.markup_seen = MARKUP_START_TOKENS.iter().any(|t| window.contains(t));
        }

        self.reconcile_ids();
        self.dirty = true;
    }

    /// Candidate blocks: fenced bodies, or the implicit markup block.
    pub fn candidates(&self, complete: bool) -> Vec<String> {
        let bodies = self.scanner.bodies(complete);
        if !bodies.is_empty() {
            return bodies;
        }
        match self.first_tag_open {
            Some(start) if self.markup_seen => vec![self.text[start..].to_string()],
            _ => Vec::new(),
        }
    }

    fn reconcile_ids(&mut self) {
        if self.mode != Mode::Create {
            return;
        }
        let wanted = self.candidates(false).len().max(1);
        while self.frame_ids.len() < wanted {
            let next = self.seed.frame(self.frame_ids.len());
            self.frame_ids.push(next);
        }
    }

    fn contents(&self, complete: bool) -> Vec<FrameContent> {
        let candidates = self.candidates(complete);
        match &self.mode {
            Mode::Create => self
                .frame_ids
                .iter()
                .enumerate()
                .map(|(i, id)| FrameContent {
                    id: id.clone(),
                    content: candidates.get(i).cloned().unwrap_or_default(),
                })
                .collect(),
            Mode::Edit(target) => vec![FrameContent {
                id: target.clone(),
                content: candidates
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| self.text.clone()),
            }],
        }
    }

    /// Authoritative pass once the stream has ended. Identifiers with no
    /// matching block get empty content. Calling it again without new
    /// input returns the same frames.
    pub fn finish(&mut self) -> Vec<FrameContent> {
        if let Some(rest) = self.markers.finish() {
            if !self.halted {
                self.absorb(&rest);
            }
        }
        self.reconcile_ids();
        self.dirty = false;
        self.contents(true)
    }
}
