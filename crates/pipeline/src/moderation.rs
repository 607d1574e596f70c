//! Output moderation.
//!
//! Chunk-level moderation sees the answer as it streams and may decide,
//! at any point, that the whole visible answer must be replaced. Because
//! a keyword can straddle chunk boundaries, the keyword filter holds
//! back a short tail of unreleased text; held text still reaches the
//! final answer through the pipeline's own accumulation.

use skein_domain::config::ModerationConfig;

/// What to do with one outgoing chunk.
pub enum ChunkVerdict {
    /// Safe to forward this much text.
    Release(String),
    /// Nothing releasable yet.
    Buffering,
    /// The visible answer must be replaced and the run stopped.
    Flagged { replacement: String },
}

pub trait OutputModeration: Send {
    fn feed_chunk(&mut self, text: &str) -> ChunkVerdict;

    /// Final check over the complete answer. `Some` is the replacement.
    fn check_final(&mut self, answer: &str) -> Option<String>;
}

/// Moderation that forwards everything untouched.
pub struct NoopModeration;

impl OutputModeration for NoopModeration {
    fn feed_chunk(&mut self, text: &str) -> ChunkVerdict {
        ChunkVerdict::Release(text.to_owned())
    }

    fn check_final(&mut self, _answer: &str) -> Option<String> {
        None
    }
}

/// Case-insensitive keyword matching with replace-on-hit.
pub struct KeywordModeration {
    keywords: Vec<String>,
    replacement: String,
    buffer: String,
    /// Chars withheld so a keyword split across chunks is still seen.
    hold_chars: usize,
    flagged: bool,
}

impl KeywordModeration {
    pub fn new(keywords: &[String], replacement: impl Into<String>) -> Self {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let hold_chars = keywords
            .iter()
            .map(|k| k.chars().count())
            .max()
            .unwrap_or(1)
            .saturating_sub(1);
        Self {
            keywords,
            replacement: replacement.into(),
            buffer: String::new(),
            hold_chars,
            flagged: false,
        }
    }

    fn hit(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k))
    }
}

impl OutputModeration for KeywordModeration {
    fn feed_chunk(&mut self, text: &str) -> ChunkVerdict {
        if self.flagged {
            return ChunkVerdict::Buffering;
        }
        self.buffer.push_str(text);
        if self.hit(&self.buffer) {
            self.flagged = true;
            return ChunkVerdict::Flagged {
                replacement: self.replacement.clone(),
            };
        }

        let total = self.buffer.chars().count();
        if total <= self.hold_chars {
            return ChunkVerdict::Buffering;
        }
        let release = total - self.hold_chars;
        let cut = self
            .buffer
            .char_indices()
            .nth(release)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len());
        let released: String = self.buffer.drain(..cut).collect();
        ChunkVerdict::Release(released)
    }

    fn check_final(&mut self, answer: &str) -> Option<String> {
        self.hit(answer).then(|| self.replacement.clone())
    }
}

/// Build the moderation stage an app's config asks for.
pub fn from_config(config: &ModerationConfig) -> Box<dyn OutputModeration> {
    if config.enabled && !config.keywords.is_empty() {
        Box::new(KeywordModeration::new(
            &config.keywords,
            config.replacement.clone(),
        ))
    } else {
        Box::new(NoopModeration)
    }
}
