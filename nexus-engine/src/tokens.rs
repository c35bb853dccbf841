//! Token counting.
//!
//! One counting scheme is chosen at process startup and shared by the
//! optimizer, prompt builder, and selection service so their accounting
//! agrees. The scheme is pluggable behind [`TokenCounter`]; the default is a
//! deterministic word-length heuristic.

use std::sync::Arc;

/// A deterministic token counting scheme.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in `text`. Empty input counts zero. Must be
    /// deterministic and O(len(text)).
    fn count(&self, text: &str) -> usize;
}

/// Shared handle to the process-wide counter.
pub type SharedCounter = Arc<dyn TokenCounter>;

/// Word-length heuristic counter.
///
/// Each whitespace-delimited word contributes `max(1, ceil(chars / 4))`
/// tokens, approximating BPE behavior: short words are one token, long
/// identifiers split. Whitespace itself contributes nothing, which keeps
/// `count(a + sep + b) == count(a) + count(b)` for whitespace separators and
/// makes chunk accounting additive.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl HeuristicCounter {
    pub fn new() -> Self {
        Self
    }

    /// The process-wide default, ready to share.
    pub fn shared() -> SharedCounter {
        Arc::new(Self)
    }
}

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace()
            .map(|word| {
                let chars = word.chars().count();
                chars.div_ceil(4).max(1)
            })
            .sum()
    }
}
