//! Opportunistic content compression.
//!
//! Text keeps its first paragraph plus any paragraph carrying a key phrase;
//! code is stripped of comments and, when still large, reduced to its
//! structural skeleton. Output is never longer than input in tokens; when a
//! pass would grow the fragment, the input is returned unchanged.

use crate::tokens::SharedCounter;
use nexus_core::types::ContentType;
use regex::Regex;
use std::sync::LazyLock;

/// Paragraphs mentioning any of these survive text compression.
const KEY_PHRASES: &[&str] = &[
    "important",
    "critical",
    "essential",
    "key",
    "crucial",
    "significant",
    "primary",
    "main",
    "fundamental",
    "vital",
    "necessary",
    "required",
    "must",
    "should",
    "conclusion",
    "therefore",
    "thus",
    "hence",
    "in summary",
    "to summarize",
];

/// Character length above which stripped code is reduced to a skeleton.
const CODE_SKELETON_THRESHOLD: usize = 1000;

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern"));

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//[^\n]*").expect("line comment pattern"));

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{4,}").expect("blank run pattern"));

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:import|use|from|require|#include)\b[^\n]*").expect("import pattern")
});

static FUNCTION_SIG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:(?:pub|export|static|async|public|private|protected)\s+)*(?:fn|function|def)\s+\w+\s*\([^)]*\)[^{\n;]*\{?",
    )
    .expect("function signature pattern")
});

static CLASS_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:(?:pub|export|abstract|final|public)\s+)*(?:class|impl|interface)\s+[\w:<>, ]+\{?",
    )
    .expect("class header pattern")
});

/// Produces shorter fragment renditions by content type.
pub struct Compressor {
    counter: SharedCounter,
}

impl Compressor {
    pub fn new(counter: SharedCounter) -> Self {
        Self { counter }
    }

    /// Compress `content` according to its type. Guaranteed not to grow the
    /// fragment: if the compressed form counts more tokens than the input,
    /// the input comes back unchanged.
    pub fn compress(&self, content: &str, content_type: ContentType) -> String {
        let compressed = match content_type {
            ContentType::Code => self.compress_code(content),
            ContentType::Text | ContentType::List | ContentType::Image => {
                self.compress_text(content)
            }
        };

        if self.counter.count(&compressed) > self.counter.count(content) {
            content.to_string()
        } else {
            compressed
        }
    }

    /// Keep the first paragraph and every paragraph containing a key phrase.
    fn compress_text(&self, content: &str) -> String {
        let paragraphs: Vec<&str> = content
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let mut kept = Vec::new();
        for (i, paragraph) in paragraphs.iter().enumerate() {
            if i == 0 {
                kept.push(*paragraph);
                continue;
            }
            let lower = paragraph.to_lowercase();
            if KEY_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
                kept.push(*paragraph);
            }
        }

        kept.join("\n\n")
    }

    /// Strip comments and collapse blank runs; over the size threshold,
    /// reduce to imports, function signatures, and class headers.
    fn compress_code(&self, content: &str) -> String {
        let stripped = BLOCK_COMMENT.replace_all(content, "");
        let stripped = LINE_COMMENT.replace_all(&stripped, "");
        let stripped = BLANK_RUN.replace_all(&stripped, "\n\n\n");
        let stripped = stripped.trim().to_string();

        if stripped.len() <= CODE_SKELETON_THRESHOLD {
            return stripped;
        }

        let mut skeleton = Vec::new();
        for m in IMPORT_LINE.find_iter(&stripped) {
            skeleton.push(m.as_str().trim().to_string());
        }
        for m in CLASS_HEADER.find_iter(&stripped) {
            skeleton.push(Self::close_header(m.as_str()));
        }
        for m in FUNCTION_SIG.find_iter(&stripped) {
            skeleton.push(Self::close_header(m.as_str()));
        }

        if skeleton.is_empty() {
            // No structural anchors: first ten lines, elided
            let head: Vec<&str> = stripped.lines().take(10).collect();
            return format!("{}\n// ...", head.join("\n"));
        }

        skeleton.join("\n")
    }

    /// Render a declaration header as an elided body.
    fn close_header(header: &str) -> String {
        let header = header.trim().trim_end_matches('{').trim_end();
        format!("{} {{ /* ... */ }}", header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::HeuristicCounter;
    use nexus_core::types::ContentType;

    fn compressor() -> Compressor {
        Compressor::new(HeuristicCounter::shared())
    }

    #[test]
    fn test_text_keeps_first_paragraph() {
        let text = "Opening statement of the document.\n\nFiller without any markers.\n\nMore filler.";
        let out = compressor().compress(text, ContentType::Text);
        assert_eq!(out, "Opening statement of the document.");
    }

    #[test]
    fn test_text_keeps_key_phrase_paragraphs() {
        let text = "Opening.\n\nThis paragraph is IMPORTANT for the reader.\n\nFiller.\n\nIn summary, keep this.";
        let out = compressor().compress(text, ContentType::Text);
        assert!(out.contains("Opening."));
        assert!(out.contains("IMPORTANT"));
        assert!(out.contains("In summary"));
        assert!(!out.contains("Filler."));
    }

    #[test]
    fn test_code_strips_comments() {
        let code = "// leading comment\nfn run() {\n    /* inline */ let x = 1;\n}\n";
        let out = compressor().compress(code, ContentType::Code);
        assert!(!out.contains("leading comment"));
        assert!(!out.contains("inline"));
        assert!(out.contains("let x = 1;"));
    }

    #[test]
    fn test_code_skeleton_over_threshold() {
        let filler = "    let value = compute_something_expensive(input, options);\n".repeat(40);
        let code = format!(
            "use std::collections::HashMap;\n\nfn first(a: u32, b: u32) -> u32 {{\n{filler}}}\n\nfn second(x: &str) {{\n{filler}}}\n"
        );
        assert!(code.len() > CODE_SKELETON_THRESHOLD);

        let out = compressor().compress(&code, ContentType::Code);
        assert!(out.contains("use std::collections::HashMap;"));
        assert!(out.contains("fn first(a: u32, b: u32) -> u32 { /* ... */ }"));
        assert!(out.contains("fn second(x: &str) { /* ... */ }"));
        assert!(!out.contains("compute_something_expensive"));
    }

    #[test]
    fn test_code_no_anchors_takes_head() {
        let code = (1..=30)
            .map(|i| format!("line{} = {};", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let padded = format!("{}\n{}", code, "x = y;\n".repeat(200));
        assert!(padded.len() > CODE_SKELETON_THRESHOLD);

        let out = compressor().compress(&padded, ContentType::Code);
        assert!(out.ends_with("// ..."));
        assert!(out.contains("line1 = 1;"));
        assert!(!out.contains("line20 = 20;"));
    }

    #[test]
    fn test_never_longer_than_input() {
        let counter = HeuristicCounter::shared();
        let compressor = Compressor::new(counter.clone());
        // Single short paragraph: compression has nothing to remove
        let text = "tiny";
        let out = compressor.compress(text, ContentType::Text);
        assert!(counter.count(&out) <= counter.count(text));
        assert_eq!(out, "tiny");
    }

    #[test]
    fn test_list_takes_text_path() {
        let list = "- first item\n\n- item with critical note\n\n- third";
        let out = compressor().compress(list, ContentType::List);
        assert!(out.contains("- first item"));
        assert!(out.contains("critical"));
    }
}
