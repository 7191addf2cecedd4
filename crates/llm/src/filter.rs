//! Reasoning markup filter
//!
//! Reasoning models interleave `<think>…</think>` spans with the answer.
//! `ThinkFilter` strips them from a live stream of increments, where a
//! marker may be split across any number of chunks.

const OPEN_MARKER: &str = "<think>";
const CLOSE_MARKER: &str = "</think>";

/// Whether text is currently being emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterState {
    #[default]
    Active,
    Suppressed,
}

/// Streaming `<think>` stripper
///
/// Output across all `push` calls plus `finish` is the concatenation of
/// the `Active` spans of the input. A trailing fragment that may be the
/// beginning of a marker is held until the next increment decides it.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    state: FilterState,
    pending: String,
    suppressed_chars: usize,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    /// Characters dropped so far
    pub fn suppressed_chars(&self) -> usize {
        self.suppressed_chars
    }

    /// Feed one raw increment, returning the text that may be emitted now
    pub fn push(&mut self, chunk: &str) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(chunk);

        let mut output = String::new();
        let mut rest = input.as_str();

        loop {
            match self.state {
                FilterState::Active => match find_marker(rest) {
                    Some((idx, marker)) => {
                        output.push_str(&rest[..idx]);
                        rest = &rest[idx + marker.len()..];
                        // a stray close marker is dropped without a state change
                        if marker == OPEN_MARKER {
                            self.state = FilterState::Suppressed;
                        }
                    }
                    None => {
                        let held = partial_marker_len(rest, &[OPEN_MARKER, CLOSE_MARKER]);
                        let split = rest.len() - held;
                        output.push_str(&rest[..split]);
                        self.pending = rest[split..].to_string();
                        break;
                    }
                },
                FilterState::Suppressed => match rest.find(CLOSE_MARKER) {
                    Some(idx) => {
                        self.suppressed_chars += rest[..idx].chars().count();
                        rest = &rest[idx + CLOSE_MARKER.len()..];
                        self.state = FilterState::Active;
                    }
                    None => {
                        let held = partial_marker_len(rest, &[CLOSE_MARKER]);
                        let split = rest.len() - held;
                        self.suppressed_chars += rest[..split].chars().count();
                        self.pending = rest[split..].to_string();
                        break;
                    }
                },
            }
        }

        output
    }

    /// End of stream: release any held fragment that turned out not to be a marker
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        match self.state {
            FilterState::Active => pending,
            FilterState::Suppressed => {
                self.suppressed_chars += pending.chars().count();
                tracing::debug!(
                    dropped_chars = self.suppressed_chars,
                    "Stream ended inside reasoning span, remaining text dropped"
                );
                String::new()
            }
        }
    }

    /// Reset for a new response
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Earliest marker in `text`, with its byte offset
fn find_marker(text: &str) -> Option<(usize, &'static str)> {
    let open = text.find(OPEN_MARKER).map(|idx| (idx, OPEN_MARKER));
    let close = text.find(CLOSE_MARKER).map(|idx| (idx, CLOSE_MARKER));
    match (open, close) {
        (Some(o), Some(c)) => Some(if o.0 <= c.0 { o } else { c }),
        (o, c) => o.or(c),
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of a marker
fn partial_marker_len(text: &str, markers: &[&str]) -> usize {
    let mut longest = 0;
    for marker in markers {
        for k in (1..marker.len()).rev() {
            if k > longest && text.ends_with(&marker[..k]) {
                longest = k;
                break;
            }
        }
    }
    longest
}
