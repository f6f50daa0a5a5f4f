//! Incremental scanner for fenced code blocks.
//!
//! A block is three backticks, an optional language tag (word characters),
//! optional whitespace, then a body that runs to the next three backticks
//! or to the end of the input. Only newly appended text is examined, and a
//! fence may be split across any number of `push` calls; the resulting block
//! list is the same as scanning the concatenated input in one go.

const FENCE_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between blocks.
    Outside,
    /// Right after an opening fence, reading the language tag.
    Tag,
    /// After the tag, skipping whitespace before the body.
    Leading,
    /// Inside a block body.
    Body,
}

/// One fenced block as seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub tag: String,
    body: String,
    closed: bool,
}

impl Block {
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Debug, Clone)]
pub struct BlockScanner {
    state: State,
    /// Backticks seen but not yet attributed to a fence or to body text.
    ticks: usize,
    blocks: Vec<Block>,
}

impl Default for BlockScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockScanner {
    pub fn new() -> Self {
        Self {
            state: State::Outside,
            ticks: 0,
            blocks: Vec::new(),
        }
    }

    pub fn push(&mut self, text: &str) {
        for c in text.chars() {
            self.step(c);
        }
    }

    fn step(&mut self, c: char) {
        match self.state {
            State::Outside => {
                if c == '`' {
                    self.ticks += 1;
                    if self.ticks == FENCE_LEN {
                        self.ticks = 0;
                        self.blocks.push(Block::default());
                        self.state = State::Tag;
                    }
                } else {
                    self.ticks = 0;
                }
            }
            State::Tag => {
                if c.is_ascii_alphanumeric() || c == '_' {
                    self.current().tag.push(c);
                } else if c.is_whitespace() {
                    self.state = State::Leading;
                } else {
                    self.state = State::Body;
                    self.step_body(c);
                }
            }
            State::Leading => {
                if !c.is_whitespace() {
                    self.state = State::Body;
                    self.step_body(c);
                }
            }
            State::Body => self.step_body(c),
        }
    }

    fn step_body(&mut self, c: char) {
        if c == '`' {
            self.ticks += 1;
            if self.ticks == FENCE_LEN {
                self.ticks = 0;
                self.current().closed = true;
                self.state = State::Outside;
            }
            return;
        }

        let held = std::mem::take(&mut self.ticks);
        let block = self.current();
        block.body.extend(std::iter::repeat('`').take(held));
        block.body.push(c);
    }

    fn current(&mut self) -> &mut Block {
        // Only called in states entered after a block was opened.
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block bodies with trailing whitespace trimmed.
    ///
    /// With `complete` set the input is treated as finished, so backticks
    /// still held at the end of an open block count as body text.
    pub fn bodies(&self, complete: bool) -> Vec<String> {
        let last = self.blocks.len().saturating_sub(1);
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let mut body = block.body.clone();
                if complete && i == last && self.state == State::Body && self.ticks > 0 {
                    body.extend(std::iter::repeat('`').take(self.ticks));
                }
                body.truncate(body.trim_end().len());
                body
            })
            .collect()
    }
}
