//! Out-of-band control markers embedded in the generation text stream.
//!
//! The server interleaves three HTML-comment-shaped markers with the model
//! output:
//!
//! - `<!-- PROCESSING_START -->` once, before any model text
//! - `<!-- STREAM_ERROR: <message> -->` once, terminal
//! - `<!-- CREDITS_DEDUCTED: <n> -->` once, after the model text
//!
//! [`MarkerFilter`] separates them from the markup again on the receiving
//! side. Chunks may split a marker anywhere, so the filter holds back a tail
//! that could still turn into one.
//!
//! Model text goes through [`MarkerEscaper`] before it is sent, so a model
//! that writes a marker of its own cannot forge one.

use std::fmt;

pub const START_MARKER: &str = "<!-- PROCESSING_START -->";
const ERROR_PREFIX: &str = "<!-- STREAM_ERROR: ";
const CREDITS_PREFIX: &str = "<!-- CREDITS_DEDUCTED: ";
const MARKER_SUFFIX: &str = " -->";
const COMMENT_OPEN: &str = "<!--";

/// Held-back text longer than this is released as plain text.
const MAX_PENDING: usize = 4096;

/// Openers of every marker the server emits.
const RESERVED_OPENERS: [&str; 3] = [
    "<!-- PROCESSING_START",
    "<!-- STREAM_ERROR:",
    "<!-- CREDITS_DEDUCTED:",
];

/// Replaces a reserved opener's `<!--` with this, which no marker starts with.
const ESCAPED_OPEN: &str = "<!---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Start,
    Error(String),
    CreditsDeducted(u64),
}

impl Marker {
    /// Build an error marker. The message is flattened to one line and any
    /// comment terminator inside it is broken up.
    pub fn error(message: impl AsRef<str>) -> Self {
        let flat = message
            .as_ref()
            .replace(['\r', '\n'], " ")
            .replace("-->", "- ->");
        Self::Error(flat)
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str(START_MARKER),
            Self::Error(msg) => write!(f, "{ERROR_PREFIX}{msg}{MARKER_SUFFIX}"),
            Self::CreditsDeducted(n) => write!(f, "{CREDITS_PREFIX}{n}{MARKER_SUFFIX}"),
        }
    }
}

/// A piece of filtered stream output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Marker(Marker),
}

/// Outcome of matching a marker at the start of a slice.
enum Match {
    /// A complete marker spanning `len` bytes.
    Found(Marker, usize),
    /// Could still become a marker once more text arrives.
    Incomplete,
    /// Definitely not a marker.
    No,
}

#[derive(Debug, Default)]
pub struct MarkerFilter {
    pending: String,
}

impl MarkerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns text and markers in stream order.
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(chunk);

        let mut out = Vec::new();
        let mut text = String::new();
        let mut pos = 0;

        while let Some(rel) = input[pos..].find(COMMENT_OPEN) {
            let at = pos + rel;
            text.push_str(&input[pos..at]);

            match match_marker(&input[at..]) {
                Match::Found(marker, len) => {
                    if !text.is_empty() {
                        out.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    out.push(Segment::Marker(marker));
                    pos = at + len;
                }
                Match::Incomplete if input.len() - at <= MAX_PENDING => {
                    self.pending = input[at..].to_string();
                    pos = input.len();
                    break;
                }
                Match::Incomplete | Match::No => {
                    text.push_str(COMMENT_OPEN);
                    pos = at + COMMENT_OPEN.len();
                }
            }
        }

        if pos < input.len() {
            let rest = &input[pos..];
            // A trailing "<", "<!" or "<!-" may be the start of a marker.
            let keep = (1..COMMENT_OPEN.len())
                .rev()
                .find(|&k| rest.ends_with(&COMMENT_OPEN[..k]))
                .unwrap_or(0);
            let split = rest.len() - keep;
            text.push_str(&rest[..split]);
            self.pending = rest[split..].to_string();
        }

        if !text.is_empty() {
            out.push(Segment::Text(text));
        }
        out
    }

    /// Release whatever is still held back as plain text.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Defuses marker look-alikes in model text.
///
/// Every `<!--` that opens a reserved marker name becomes `<!---`, which
/// [`MarkerFilter`] passes through as plain text. A tail that may still
/// grow into a reserved opener is held until the next chunk.
#[derive(Debug, Default)]
pub struct MarkerEscaper {
    pending: String,
}

impl MarkerEscaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of model text; returns the text that is safe to send.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(chunk);

        let mut out = String::with_capacity(input.len());
        let mut pos = 0;

        while let Some(rel) = input[pos..].find(COMMENT_OPEN) {
            let at = pos + rel;
            out.push_str(&input[pos..at]);
            let rest = &input[at..];

            if RESERVED_OPENERS.iter().any(|r| rest.starts_with(r)) {
                out.push_str(ESCAPED_OPEN);
            } else if RESERVED_OPENERS
                .iter()
                .any(|r| r.len() > rest.len() && r.starts_with(rest))
            {
                self.pending = rest.to_string();
                return out;
            } else {
                out.push_str(COMMENT_OPEN);
            }
            pos = at + COMMENT_OPEN.len();
        }

        let rest = &input[pos..];
        let keep = (1..COMMENT_OPEN.len())
            .rev()
            .find(|&k| rest.ends_with(&COMMENT_OPEN[..k]))
            .unwrap_or(0);
        let split = rest.len() - keep;
        out.push_str(&rest[..split]);
        self.pending = rest[split..].to_string();
        out
    }

    /// Release the held tail. It is too short to be a reserved opener, so it
    /// goes out unchanged.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

fn match_marker(s: &str) -> Match {
    if s.starts_with(START_MARKER) {
        return Match::Found(Marker::Start, START_MARKER.len());
    }

    if let Some(body) = s.strip_prefix(ERROR_PREFIX) {
        return match body.find(MARKER_SUFFIX) {
            Some(end) if !body[..end].contains('\n') => Match::Found(
                Marker::Error(body[..end].to_string()),
                ERROR_PREFIX.len() + end + MARKER_SUFFIX.len(),
            ),
            Some(_) => Match::No,
            None if body.contains('\n') => Match::No,
            None => Match::Incomplete,
        };
    }

    if let Some(body) = s.strip_prefix(CREDITS_PREFIX) {
        let digits = body.bytes().take_while(u8::is_ascii_digit).count();
        let tail = &body[digits..];
        if digits == 0 {
            return if tail.is_empty() {
                Match::Incomplete
            } else {
                Match::No
            };
        }
        if tail.starts_with(MARKER_SUFFIX) {
            return match body[..digits].parse() {
                Ok(n) => Match::Found(
                    Marker::CreditsDeducted(n),
                    CREDITS_PREFIX.len() + digits + MARKER_SUFFIX.len(),
                ),
                Err(_) => Match::No,
            };
        }
        return if MARKER_SUFFIX.starts_with(tail) {
            Match::Incomplete
        } else {
            Match::No
        };
    }

    let is_prefix_of_marker = [START_MARKER, ERROR_PREFIX, CREDITS_PREFIX]
        .iter()
        .any(|m| m.len() > s.len() && m.starts_with(s));
    if is_prefix_of_marker {
        Match::Incomplete
    } else {
        Match::No
    }
}
