//! Token-to-phrase aggregation.
//!
//! Reply tokens arrive as small fragments; synthesis wants speakable spans.
//! The aggregator accumulates fragments and closes a phrase when the buffer
//! ends in terminal punctuation or grows past the length threshold. Pauses
//! between fragments are the caller's concern (the reply loop flushes on a
//! recv timeout), and any residual text is flushed when the stream ends.

/// A closed span of reply text, numbered from 1 within its cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    pub seq: u64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PhraseOptions {
    /// Characters that close a phrase when they end the buffer.
    pub punctuation: Vec<char>,
    /// Buffer length (chars) that closes a phrase regardless of punctuation.
    pub max_chars: usize,
}

impl Default for PhraseOptions {
    fn default() -> Self {
        Self {
            punctuation: vec!['.', '?', '!'],
            max_chars: 60,
        }
    }
}

/// Accumulates token fragments into sequenced phrases.
pub struct PhraseAggregator {
    options: PhraseOptions,
    buffer: String,
    next_seq: u64,
}

impl PhraseAggregator {
    pub fn new(options: PhraseOptions) -> Self {
        Self {
            options,
            buffer: String::new(),
            next_seq: 1,
        }
    }

    /// Sequence number the next closed phrase will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Append one fragment; returns the phrase it closed, if any.
    pub fn push(&mut self, fragment: &str) -> Option<Phrase> {
        if fragment.is_empty() {
            return None;
        }
        self.buffer.push_str(fragment);

        let text = self.buffer.trim();
        if text.is_empty() {
            return None;
        }
        let ends_terminal = text
            .chars()
            .next_back()
            .is_some_and(|c| self.options.punctuation.contains(&c));
        if ends_terminal || text.chars().count() >= self.options.max_chars {
            return self.close();
        }
        None
    }

    /// Close the current buffer as a phrase regardless of punctuation.
    /// Used for inter-fragment pauses and end-of-stream residue.
    pub fn flush(&mut self) -> Option<Phrase> {
        self.close()
    }

    fn close(&mut self) -> Option<Phrase> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(Phrase { seq, text })
    }
}

impl Default for PhraseAggregator {
    fn default() -> Self {
        Self::new(PhraseOptions::default())
    }
}
