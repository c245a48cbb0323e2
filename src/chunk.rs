//! Overlapping, language-aware text chunker.
//!
//! Splits file content into passages of at most `chunk_size` characters,
//! with up to `chunk_overlap` characters repeated between neighbours so a
//! retrieved passage keeps some of its surrounding context.
//!
//! # Algorithm
//!
//! 1. Pick the separator table for the file's extension (source code,
//!    markup, or the generic `\n\n`, `\n`, ` ` fallback).
//! 2. Split on the first separator that occurs in the text. Separators are
//!    kept at the start of the piece that follows them, so no text is lost.
//! 3. Pieces shorter than `chunk_size` are merged greedily into a sliding
//!    window; when the window is full it is emitted and trimmed from the
//!    front until at most `chunk_overlap` characters remain.
//! 4. Pieces that are still too long are split again with the remaining
//!    separators, down to single characters.
//!
//! Output depends only on the content and the extension.

use std::collections::VecDeque;
use std::path::Path;

use crate::config::ChunkingConfig;
use crate::models::SkipReason;

const JS_SEPARATORS: &[&str] = &[
    "\nexport ",
    "\nfunction ",
    "\nconst ",
    "\nlet ",
    "\nvar ",
    "\nclass ",
    "\nif ",
    "\nfor ",
    "\nwhile ",
    "\nswitch ",
    "\ncase ",
    "\ndefault ",
    "\n\n",
    "\n",
    " ",
    "",
];

const RUST_SEPARATORS: &[&str] = &[
    "\nfn ",
    "\npub fn ",
    "\nimpl ",
    "\nstruct ",
    "\nenum ",
    "\nmod ",
    "\nconst ",
    "\nlet ",
    "\nif ",
    "\nwhile ",
    "\nfor ",
    "\nloop ",
    "\nmatch ",
    "\n\n",
    "\n",
    " ",
    "",
];

const PYTHON_SEPARATORS: &[&str] = &["\nclass ", "\ndef ", "\n\tdef ", "\n    def ", "\n\n", "\n", " ", ""];

const GO_SEPARATORS: &[&str] = &[
    "\nfunc ",
    "\nvar ",
    "\nconst ",
    "\ntype ",
    "\nif ",
    "\nfor ",
    "\nswitch ",
    "\ncase ",
    "\n\n",
    "\n",
    " ",
    "",
];

const JAVA_SEPARATORS: &[&str] = &[
    "\nclass ",
    "\npublic ",
    "\nprotected ",
    "\nprivate ",
    "\nstatic ",
    "\nif ",
    "\nfor ",
    "\nwhile ",
    "\nswitch ",
    "\ncase ",
    "\n\n",
    "\n",
    " ",
    "",
];

const CPP_SEPARATORS: &[&str] = &[
    "\nclass ",
    "\nstruct ",
    "\nvoid ",
    "\nint ",
    "\nfloat ",
    "\ndouble ",
    "\nif ",
    "\nfor ",
    "\nwhile ",
    "\nswitch ",
    "\ncase ",
    "\n\n",
    "\n",
    " ",
    "",
];

const MARKDOWN_SEPARATORS: &[&str] = &[
    "\n## ",
    "\n### ",
    "\n#### ",
    "\n##### ",
    "\n###### ",
    "```\n\n",
    "\n\n***\n\n",
    "\n\n---\n\n",
    "\n\n___\n\n",
    "\n\n",
    "\n",
    " ",
    "",
];

const GENERIC_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Separator family chosen from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLanguage {
    JavaScript,
    Rust,
    Python,
    Go,
    Java,
    Cpp,
    Markdown,
    Generic,
}

impl SplitLanguage {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Self::JavaScript,
            "rs" => Self::Rust,
            "py" => Self::Python,
            "go" => Self::Go,
            "java" | "kt" | "scala" => Self::Java,
            "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" => Self::Cpp,
            "md" | "markdown" | "mdx" => Self::Markdown,
            _ => Self::Generic,
        }
    }

    pub fn separators(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript => JS_SEPARATORS,
            Self::Rust => RUST_SEPARATORS,
            Self::Python => PYTHON_SEPARATORS,
            Self::Go => GO_SEPARATORS,
            Self::Java => JAVA_SEPARATORS,
            Self::Cpp => CPP_SEPARATORS,
            Self::Markdown => MARKDOWN_SEPARATORS,
            Self::Generic => GENERIC_SEPARATORS,
        }
    }
}

/// A chunk of file text, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

/// Recursive character splitter with overlap.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self::with_sizes(config.chunk_size, config.chunk_overlap)
    }

    pub fn with_sizes(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Split `content` using the separator table for `path`'s extension.
    ///
    /// Blank content yields no chunks.
    pub fn chunk(&self, path: &Path, content: &str) -> Vec<TextChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.split(content, SplitLanguage::from_path(path).separators(), &mut out);
        out.into_iter()
            .enumerate()
            .map(|(index, text)| TextChunk { index, text })
            .collect()
    }

    fn split(&self, text: &str, separators: &[&str], out: &mut Vec<String>) {
        let (separator, rest) = pick_separator(text, separators);
        let mut good: Vec<&str> = Vec::new();

        for piece in split_keep(text, separator) {
            if char_len(piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                self.merge(&good, out);
                good.clear();
            }
            if rest.is_empty() {
                push_trimmed(piece, out);
            } else {
                self.split(piece, rest, out);
            }
        }

        if !good.is_empty() {
            self.merge(&good, out);
        }
    }

    fn merge(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&join(&window), out);
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, l)) => total -= l,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&join(&window), out);
        }
    }
}

/// Strip NUL characters and reject content that is not text.
///
/// NUL bytes are removed before UTF-8 validation; whatever fails to decode
/// after that is treated as binary.
pub fn sanitize(raw: &[u8]) -> Result<String, SkipReason> {
    let stripped: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
    let text = String::from_utf8(stripped).map_err(|_| SkipReason::Binary)?;
    if text.trim().is_empty() {
        return Err(SkipReason::Empty);
    }
    Ok(text)
}

fn pick_separator<'a, 's>(text: &str, separators: &'a [&'s str]) -> (&'s str, &'a [&'s str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return (sep, &[]);
        }
        if text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Split `text` before every occurrence of `sep`; each piece after the
/// first starts with the separator.
fn split_keep<'t>(text: &'t str, sep: &str) -> Vec<&'t str> {
    if sep.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(s, _)| *s).collect()
}

fn push_trimmed(text: &str, out: &mut Vec<String>) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
