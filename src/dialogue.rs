//! Dialogue line formatting
//!
//! Turns raw backend lines (`"Speaker: text"`) into display messages, splits
//! `**emphasis**` spans for styling, and produces the typewriter reveal.

use futures::stream::{self, Stream};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NARRATOR: &str = "Narrator";
pub const YOU: &str = "You";
pub const SYSTEM: &str = "System";

const SPEAKER_DELIMITER: &str = ": ";

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("emphasis pattern is valid"));

/// Quote pairs stripped from around a line (one layer only)
const QUOTE_PAIRS: [(char, char); 4] = [('"', '"'), ('\'', '\''), ('“', '”'), ('‘', '’')];

/// A parsed dialogue line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueLine {
    pub author: String,
    pub text: String,
}

/// Split a raw line on the first `": "`.
///
/// Lines without a speaker are narration.
pub fn parse_line(raw: &str) -> DialogueLine {
    match raw.split_once(SPEAKER_DELIMITER) {
        Some((author, text)) if !author.trim().is_empty() => DialogueLine {
            author: author.trim().to_string(),
            text: strip_quotes(text.trim()).to_string(),
        },
        Some((_, text)) => DialogueLine {
            author: NARRATOR.to_string(),
            text: strip_quotes(text.trim()).to_string(),
        },
        None => DialogueLine {
            author: NARRATOR.to_string(),
            text: strip_quotes(raw.trim()).to_string(),
        },
    }
}

/// Remove one layer of matching straight or curly quotes
pub fn strip_quotes(text: &str) -> &str {
    for (open, close) in QUOTE_PAIRS {
        if text.chars().count() >= 2 {
            if let Some(inner) = text
                .strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
            {
                return inner;
            }
        }
    }
    text
}

/// Text as shown in the chat bubble: narration is parenthesized
pub fn display_text(author: &str, text: &str) -> String {
    if author == NARRATOR {
        format!("({text})")
    } else {
        text.to_string()
    }
}

/// How a span of displayed text is styled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStyle {
    Plain,
    Emphasis,
    Narration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    pub style: SegmentStyle,
}

impl Segment {
    fn new(text: impl Into<String>, style: SegmentStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// Split `**marked**` spans out of a line, dropping the markers.
///
/// Single pass, no nesting. Unbalanced markers stay in the text literally.
pub fn emphasis_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in EMPHASIS.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            if let Some(plain) = text.get(last..whole.start()) {
                segments.push(Segment::new(plain, SegmentStyle::Plain));
            }
        }
        segments.push(Segment::new(inner.as_str(), SegmentStyle::Emphasis));
        last = whole.end();
    }

    if let Some(rest) = text.get(last..) {
        if !rest.is_empty() {
            segments.push(Segment::new(rest, SegmentStyle::Plain));
        }
    }
    segments
}

/// Styled segments for a message. Narration is one parenthesized span.
pub fn styled_segments(author: &str, text: &str) -> Vec<Segment> {
    if author == NARRATOR {
        vec![Segment::new(display_text(author, text), SegmentStyle::Narration)]
    } else {
        emphasis_segments(text)
    }
}

/// Speaker label shown above a bubble; narration has none
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeakerLabel {
    pub name: String,
    pub emphasized: bool,
}

pub fn speaker_label(author: &str) -> Option<SpeakerLabel> {
    if author == NARRATOR {
        return None;
    }
    let label = match author
        .strip_prefix("**")
        .and_then(|rest| rest.strip_suffix("**"))
    {
        Some(name) if !name.is_empty() => SpeakerLabel {
            name: name.to_string(),
            emphasized: true,
        },
        _ => SpeakerLabel {
            name: author.to_string(),
            emphasized: false,
        },
    };
    Some(label)
}

// ============================================================================
// Reveal sequence
// ============================================================================

/// Increasingly complete prefixes of a text, one character at a time.
///
/// Consumed once; there is no way to rewind it.
#[derive(Debug)]
pub struct Reveal {
    text: String,
    end: usize,
}

impl Reveal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            end: 0,
        }
    }
}

impl Iterator for Reveal {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let ch = self.text.get(self.end..)?.chars().next()?;
        self.end += ch.len_utf8();
        self.text.get(..self.end).map(str::to_string)
    }
}

/// One step of a timed reveal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealStep {
    Frame(String),
    Complete,
}

/// Timed reveal: a frame every `delay`, then `Complete`.
///
/// Cancelling the token ends the stream early without `Complete`.
pub fn reveal_stream(
    text: &str,
    delay: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = RevealStep> {
    stream::unfold((Reveal::new(text), false), move |(mut reveal, done)| {
        let cancel = cancel.clone();
        async move {
            if done || cancel.is_cancelled() {
                return None;
            }
            match reveal.next() {
                Some(prefix) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        () = tokio::time::sleep(delay) => Some((RevealStep::Frame(prefix), (reveal, false))),
                    }
                }
                None => Some((RevealStep::Complete, (reveal, true))),
            }
        }
    })
}
