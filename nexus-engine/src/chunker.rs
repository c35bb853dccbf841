//! Content-type-aware chunking.
//!
//! A chunk is a contiguous view over part of a source text, capped at a
//! token budget. Strategies differ in the atomic unit they refuse to split
//! (paragraph, sentence, code region, list run, word) and in the separator
//! that reconstructs the source when chunk contents are concatenated back in
//! order.

use crate::tokens::SharedCounter;
use nexus_core::types::{ContentType, Metadata};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("paragraph break pattern"));

static CODE_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:(?:pub|export|static|async|public|private|protected)\s+)*(?:fn|function|def|class|impl|interface)\b|(?:import|use|from|require)\b|//|/\*|#)",
    )
    .expect("code anchor pattern")
});

static BRACE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[{}]\s*$").expect("brace line pattern"));

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?://|#)").expect("line comment pattern"));

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•]\s+|\d+\.\s+|[a-z]\)\s+)").expect("list item pattern")
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("word pattern"));

/// How a source text is split into packable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Blank-line paragraphs, greedily packed (default for text)
    Paragraph,
    /// Sentence-level packing
    Semantic,
    /// Declaration/import/comment anchors become boundaries (default for code)
    CodeAware,
    /// Contiguous list runs are indivisible
    ListAware,
    /// Whitespace-delimited words, greedily packed
    FixedSize,
}

impl ChunkStrategy {
    /// Default strategy for a content type. Total over the variant.
    pub fn for_content_type(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Text => Self::Paragraph,
            ContentType::Code => Self::CodeAware,
            ContentType::List => Self::ListAware,
            ContentType::Image => Self::Paragraph,
        }
    }

    /// Separator that reconstructs the source from chunk contents.
    pub fn separator(&self) -> &'static str {
        match self {
            Self::Paragraph | Self::ListAware => "\n\n",
            Self::Semantic | Self::FixedSize => " ",
            Self::CodeAware => "",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Semantic => "semantic",
            Self::CodeAware => "code_aware",
            Self::ListAware => "list_aware",
            Self::FixedSize => "fixed_size",
        }
    }
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        Self::Paragraph
    }
}

/// A contiguous view over part of a content item's body. Never persisted.
#[derive(Debug, Clone)]
pub struct ContentChunk {
    pub content: String,
    pub tokens: usize,
    /// Byte offset of the chunk's first unit in the source
    pub start_index: usize,
    /// Byte offset one past the chunk's last unit
    pub end_index: usize,
    pub metadata: Metadata,
}

/// A packable unit with its source span.
#[derive(Debug, Clone)]
struct Unit {
    text: String,
    start: usize,
    end: usize,
}

/// Splits content into ordered chunks under a per-chunk token cap.
pub struct Chunker {
    counter: SharedCounter,
}

impl Chunker {
    pub fn new(counter: SharedCounter) -> Self {
        Self { counter }
    }

    /// Chunk `text` with the given strategy. Emitted chunks are ordered,
    /// have monotonically non-decreasing spans, and never exceed
    /// `max_chunk_tokens` except for a single word that alone exceeds the
    /// cap, which is emitted as its own chunk.
    pub fn chunk(
        &self,
        text: &str,
        strategy: ChunkStrategy,
        max_chunk_tokens: usize,
    ) -> Vec<ContentChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let max = max_chunk_tokens.max(1);

        let chunks = match strategy {
            ChunkStrategy::Paragraph => self.chunk_units(split_paragraphs(text), "\n\n", max),
            ChunkStrategy::Semantic => self.chunk_units(split_sentences(text), " ", max),
            ChunkStrategy::CodeAware => self.chunk_code(text, max),
            ChunkStrategy::ListAware => self.chunk_list(text, max),
            ChunkStrategy::FixedSize => self.chunk_fixed(text, 0, max),
        };

        // A strategy that yields nothing for non-empty input has failed;
        // FixedSize always makes progress.
        if chunks.is_empty() && strategy != ChunkStrategy::FixedSize {
            warn!(strategy = strategy.as_str(), "chunk strategy produced no output, falling back to fixed_size");
            return self.annotate(self.chunk_fixed(text, 0, max), ChunkStrategy::FixedSize);
        }

        self.annotate(chunks, strategy)
    }

    /// Chunk with the default strategy for a content type.
    pub fn chunk_for_type(
        &self,
        text: &str,
        content_type: ContentType,
        max_chunk_tokens: usize,
    ) -> Vec<ContentChunk> {
        self.chunk(text, ChunkStrategy::for_content_type(content_type), max_chunk_tokens)
    }

    fn annotate(&self, mut chunks: Vec<ContentChunk>, strategy: ChunkStrategy) -> Vec<ContentChunk> {
        for chunk in &mut chunks {
            chunk
                .metadata
                .insert("strategy".into(), serde_json::json!(strategy.as_str()));
        }
        chunks
    }

    /// Greedy packing: append the next unit while the running token total
    /// stays within the cap. Units over the cap on their own are split with
    /// the fixed-size scheme.
    fn chunk_units(&self, units: Vec<Unit>, sep: &str, max: usize) -> Vec<ContentChunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<Unit> = Vec::new();
        let mut current_tokens = 0usize;

        for unit in units {
            let unit_tokens = self.counter.count(&unit.text);

            if unit_tokens > max {
                self.flush(&mut chunks, &mut current, &mut current_tokens, sep);
                chunks.extend(self.chunk_fixed(&unit.text, unit.start, max));
                continue;
            }

            if current_tokens + unit_tokens > max && !current.is_empty() {
                self.flush(&mut chunks, &mut current, &mut current_tokens, sep);
            }

            current_tokens += unit_tokens;
            current.push(unit);
        }

        self.flush(&mut chunks, &mut current, &mut current_tokens, sep);
        chunks
    }

    fn flush(
        &self,
        chunks: &mut Vec<ContentChunk>,
        current: &mut Vec<Unit>,
        current_tokens: &mut usize,
        sep: &str,
    ) {
        if current.is_empty() {
            return;
        }
        let start = current[0].start;
        let end = current[current.len() - 1].end;
        let content = current
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join(sep);
        let tokens = self.counter.count(&content);
        chunks.push(ContentChunk {
            content,
            tokens,
            start_index: start,
            end_index: end,
            metadata: Metadata::new(),
        });
        current.clear();
        *current_tokens = 0;
    }

    /// Fixed-size packing of whitespace-delimited words. A single word over
    /// the cap is emitted alone; that is the one permitted cap violation.
    fn chunk_fixed(&self, text: &str, base: usize, max: usize) -> Vec<ContentChunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<Unit> = Vec::new();
        let mut current_tokens = 0usize;

        for m in WORD.find_iter(text) {
            let word = Unit {
                text: m.as_str().to_string(),
                start: base + m.start(),
                end: base + m.end(),
            };
            let word_tokens = self.counter.count(&word.text);

            if word_tokens > max {
                self.flush(&mut chunks, &mut current, &mut current_tokens, " ");
                chunks.push(ContentChunk {
                    content: word.text,
                    tokens: word_tokens,
                    start_index: word.start,
                    end_index: word.end,
                    metadata: Metadata::new(),
                });
                continue;
            }

            if current_tokens + word_tokens > max && !current.is_empty() {
                self.flush(&mut chunks, &mut current, &mut current_tokens, " ");
            }

            current_tokens += word_tokens;
            current.push(word);
        }

        self.flush(&mut chunks, &mut current, &mut current_tokens, " ");
        chunks
    }

    /// Code-aware chunking. Every anchor line (declaration, import, comment
    /// start, brace-only line) opens a new region; regions are chunk
    /// boundaries and are never merged. Lines inside a region pack greedily.
    /// Consecutive line-comment lines extend one region rather than opening
    /// a new one per line.
    fn chunk_code(&self, text: &str, max: usize) -> Vec<ContentChunk> {
        let mut regions: Vec<Vec<Unit>> = Vec::new();
        let mut offset = 0usize;
        let mut prev_line_comment = false;

        for line in text.split_inclusive('\n') {
            let end = offset + line.len();
            let is_comment = LINE_COMMENT.is_match(line);
            let is_anchor = (CODE_ANCHOR.is_match(line) || BRACE_ONLY.is_match(line))
                && !(is_comment && prev_line_comment);

            let unit = Unit {
                text: line.to_string(),
                start: offset,
                end,
            };
            if is_anchor || regions.is_empty() {
                regions.push(vec![unit]);
            } else if let Some(last) = regions.last_mut() {
                last.push(unit);
            }
            prev_line_comment = is_comment;
            offset = end;
        }

        let mut chunks = Vec::new();
        for region in regions {
            chunks.extend(self.chunk_units(region, "", max));
        }
        chunks
    }

    /// List-aware chunking. Contiguous runs of list-item lines form
    /// indivisible units; everything else splits at paragraph boundaries. A
    /// run that alone exceeds the cap falls back to paragraph chunking of
    /// its text.
    fn chunk_list(&self, text: &str, max: usize) -> Vec<ContentChunk> {
        let mut units: Vec<(Unit, bool)> = Vec::new();
        let mut run: Option<Unit> = None;
        let mut prose_start: Option<usize> = None;
        let mut offset = 0usize;

        fn close_run(units: &mut Vec<(Unit, bool)>, run: &mut Option<Unit>) {
            if let Some(mut unit) = run.take() {
                let trimmed = unit.text.trim_end().len();
                unit.end -= unit.text.len() - trimmed;
                unit.text.truncate(trimmed);
                units.push((unit, true));
            }
        }

        let mut close_prose = |units: &mut Vec<(Unit, bool)>, start: &mut Option<usize>, end: usize| {
            if let Some(s) = start.take() {
                for unit in split_paragraphs_at(&text[s..end], s) {
                    units.push((unit, false));
                }
            }
        };

        for line in text.split_inclusive('\n') {
            let end = offset + line.len();
            if LIST_ITEM.is_match(line) {
                close_prose(&mut units, &mut prose_start, offset);
                match &mut run {
                    Some(unit) => {
                        unit.text.push_str(line);
                        unit.end = end;
                    }
                    None => {
                        run = Some(Unit {
                            text: line.to_string(),
                            start: offset,
                            end,
                        });
                    }
                }
            } else {
                close_run(&mut units, &mut run);
                if prose_start.is_none() {
                    prose_start = Some(offset);
                }
            }
            offset = end;
        }
        close_run(&mut units, &mut run);
        close_prose(&mut units, &mut prose_start, text.len());

        // Sequential packing keeps document order between runs and prose
        let mut chunks = Vec::new();
        let mut current: Vec<Unit> = Vec::new();
        let mut current_tokens = 0usize;
        for (unit, is_run) in units {
            let tokens = self.counter.count(&unit.text);
            if tokens > max {
                self.flush(&mut chunks, &mut current, &mut current_tokens, "\n\n");
                if is_run {
                    // Oversized run loses indivisibility
                    chunks.extend(self.chunk_units(
                        split_paragraphs_at(&unit.text, unit.start),
                        "\n\n",
                        max,
                    ));
                } else {
                    chunks.extend(self.chunk_fixed(&unit.text, unit.start, max));
                }
                continue;
            }
            if current_tokens + tokens > max && !current.is_empty() {
                self.flush(&mut chunks, &mut current, &mut current_tokens, "\n\n");
            }
            current_tokens += tokens;
            current.push(unit);
        }
        self.flush(&mut chunks, &mut current, &mut current_tokens, "\n\n");
        chunks
    }
}

/// Trim a span to its non-whitespace extent, or None when blank.
fn trimmed_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    Some((start + lead, end - trail))
}

/// Blank-line paragraph units, trimmed, with source spans.
fn split_paragraphs(text: &str) -> Vec<Unit> {
    split_paragraphs_at(text, 0)
}

fn split_paragraphs_at(text: &str, base: usize) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut cursor = 0usize;

    for m in PARAGRAPH_BREAK.find_iter(text) {
        if let Some((start, end)) = trimmed_span(text, cursor, m.start()) {
            units.push(Unit {
                text: text[start..end].to_string(),
                start: base + start,
                end: base + end,
            });
        }
        cursor = m.end();
    }
    if let Some((start, end)) = trimmed_span(text, cursor, text.len()) {
        units.push(Unit {
            text: text[start..end].to_string(),
            start: base + start,
            end: base + end,
        });
    }
    units
}

/// Sentence units: the longest run ending with `.`, `!` or `?` followed by
/// whitespace or end of input. Trailing text without a terminator is a final
/// unit.
fn split_sentences(text: &str) -> Vec<Unit> {
    let mut units = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'.' || b == b'!' || b == b'?' {
            // Longest match: consume the whole terminator run
            let mut end = i + 1;
            while end < bytes.len()
                && matches!(bytes[end], b'.' | b'!' | b'?')
            {
                end += 1;
            }
            let at_boundary = end >= bytes.len() || bytes[end].is_ascii_whitespace();
            if at_boundary {
                if let Some((s, e)) = trimmed_span(text, start, end) {
                    units.push(Unit {
                        text: text[s..e].to_string(),
                        start: s,
                        end: e,
                    });
                }
                start = end;
            }
            i = end;
        } else {
            i += 1;
        }
    }

    if let Some((s, e)) = trimmed_span(text, start, text.len()) {
        units.push(Unit {
            text: text[s..e].to_string(),
            start: s,
            end: e,
        });
    }
    units
}
