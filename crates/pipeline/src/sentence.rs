//! Sentence splitter for streaming LLM output
//!
//! Buffers filtered text and emits complete sentences for synthesis. The
//! first sentence of a response may be cut early at a clause break so the
//! first audio starts sooner.

/// Hard sentence terminators
const TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？', '；', ';', '\n'];

/// Clause breaks usable for an early first sentence
const SOFT_BREAKS: &[char] = &[',', '，', '、', ':', '：'];

/// Closing characters that stay attached to the sentence they end
const CLOSERS: &[char] = &['"', '\'', ')', ']', '”', '’', '」', '）'];

/// Sentence splitter configuration
#[derive(Debug, Clone)]
pub struct SentenceSplitterConfig {
    /// Minimum characters before the first sentence may break at a clause
    pub min_chars_first_sentence: usize,
    /// Maximum characters to buffer before forcing emission
    pub max_buffer_chars: usize,
}

impl Default for SentenceSplitterConfig {
    fn default() -> Self {
        Self {
            min_chars_first_sentence: 15,
            max_buffer_chars: 500,
        }
    }
}

/// Incremental sentence splitter
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    config: SentenceSplitterConfig,
    buffer: String,
    emitted: usize,
}

impl SentenceSplitter {
    pub fn new(config: SentenceSplitterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            emitted: 0,
        }
    }

    /// Append text, returning every sentence it completes
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut sentences = Vec::new();

        while let Some(end) = self.next_boundary() {
            let sentence: String = self.buffer.drain(..end).collect();
            self.accept(sentence, &mut sentences);
        }

        if self.buffer.chars().count() >= self.config.max_buffer_chars {
            let sentence = std::mem::take(&mut self.buffer);
            self.accept(sentence, &mut sentences);
        }

        sentences
    }

    /// End of stream: return whatever is left
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            self.emitted += 1;
            Some(rest.to_string())
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.emitted = 0;
    }

    fn accept(&mut self, sentence: String, out: &mut Vec<String>) {
        let sentence = sentence.trim();
        if !sentence.is_empty() {
            self.emitted += 1;
            out.push(sentence.to_string());
        }
    }

    /// Byte offset just past the next complete sentence in the buffer
    fn next_boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        let mut count = 0;
        let mut soft_break = None;

        while let Some((idx, c)) = chars.next() {
            count += 1;

            if TERMINATORS.contains(&c) {
                let next = chars.peek().map(|(_, n)| *n);
                // "3.5" or "e.g." mid-stream: wait unless followed by a space
                if c == '.' {
                    match next {
                        None => return None,
                        Some(n) if !n.is_whitespace() && !CLOSERS.contains(&n) => continue,
                        _ => {}
                    }
                }

                let mut end = idx + c.len_utf8();
                while let Some(&(next_idx, next)) = chars.peek() {
                    if CLOSERS.contains(&next) {
                        end = next_idx + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                return Some(end);
            }

            if self.emitted == 0
                && SOFT_BREAKS.contains(&c)
                && count >= self.config.min_chars_first_sentence
            {
                soft_break = Some(idx + c.len_utf8());
            }
        }

        soft_break
    }
}
