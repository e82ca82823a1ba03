//! Strategy-dispatched chunking and sliding-window compression.
//!
//! All positions are character offsets into the source, and every chunk's
//! content is the exact `[start, end)` substring, so consecutive chunks can
//! be reassembled by dropping the overlapping prefix of each chunk.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// Characters per estimated token.
const CHARS_PER_TOKEN: f64 = 3.5;

/// Estimate the token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    /// Fixed-size windows stepping by `chunk_size - overlap`.
    FixedSize,
    /// Dispatch by detected file type: code, documentation, or prose.
    SemanticAware,
    /// Split at function/class/type declaration lines.
    FunctionAware,
    /// Split at blank-line boundaries.
    ParagraphAware,
}

/// Metadata attached to each chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Character start offset in the source.
    pub start: usize,
    /// Character end offset in the source (exclusive).
    pub end: usize,
    /// Source path, when known.
    pub source: Option<String>,
    /// Strategy label that produced this chunk.
    pub chunk_type: String,
    /// Detected language, when known.
    pub language: Option<String>,
    /// Position of this chunk in the sequence.
    pub chunk_index: usize,
}

/// One chunk of a source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Result of sliding-window compression.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingWindow {
    pub content: String,
    /// Number of sections the input decomposed into.
    pub total_chunks: usize,
    /// Number of sections represented in the output.
    pub selected_chunks: usize,
}

static TS_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(export\s+)?(async\s+)?(function\s+\w+|class\s+\w+|interface\s+\w+|type\s+\w+\s*=|const\s+\w+\s*=\s*(async\s*)?\()")
        .expect("invalid regex")
});

static PY_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(def\s+\w+|class\s+\w+|@\w+)").expect("invalid regex")
});

static JAVA_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(public|private|protected|static).*\)\s*\{?\s*$|^\s*(class|interface)\s+\w+")
        .expect("invalid regex")
});

static RUST_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(pub\s+)?(async\s+)?(fn\s+\w+|struct\s+\w+|enum\s+\w+|trait\s+\w+|impl\b)")
        .expect("invalid regex")
});

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s").expect("invalid regex"));

const CODE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "py", "java", "rs", "go", "c", "cpp", "h",
];
const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "adoc"];

fn extension(path: &str) -> Option<&str> {
    path.rsplit('.').next().filter(|e| *e != path)
}

fn language_for(path: &str) -> Option<&'static str> {
    match extension(path)? {
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "py" => Some("python"),
        "java" => Some("java"),
        "rs" => Some("rust"),
        _ => None,
    }
}

fn declaration_regex(language: Option<&str>) -> &'static Regex {
    match language {
        Some("python") => &PY_DECLARATION,
        Some("java") => &JAVA_DECLARATION,
        Some("rust") => &RUST_DECLARATION,
        _ => &TS_DECLARATION,
    }
}

/// Strategy-dispatched chunking engine.
#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingEngine {
    /// Create an engine. Fails when `overlap >= chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({overlap}) must be less than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Chunk a text with the given strategy.
    pub fn chunk(
        &self,
        content: &str,
        file_path: Option<&str>,
        strategy: ChunkStrategy,
    ) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = content.chars().collect();
        let boundaries = match strategy {
            ChunkStrategy::FixedSize => self.fixed_boundaries(chars.len()),
            ChunkStrategy::FunctionAware => self.function_boundaries(&chars, file_path),
            ChunkStrategy::ParagraphAware => self.paragraph_boundaries(&chars),
            ChunkStrategy::SemanticAware => return self.semantic_chunks(content, file_path),
        };

        self.materialize(&chars, boundaries, file_path, strategy_label(strategy))
    }

    fn semantic_chunks(&self, content: &str, file_path: Option<&str>) -> Vec<Chunk> {
        let strategy = match file_path.and_then(extension) {
            Some(ext) if CODE_EXTENSIONS.contains(&ext) => ChunkStrategy::FunctionAware,
            Some(ext) if DOC_EXTENSIONS.contains(&ext) => ChunkStrategy::ParagraphAware,
            _ => {
                let chars: Vec<char> = content.chars().collect();
                let boundaries = self.sentence_boundaries(&chars);
                return self.materialize(&chars, boundaries, file_path, "semantic-aware");
            }
        };
        let mut chunks = self.chunk(content, file_path, strategy);
        for chunk in &mut chunks {
            chunk.metadata.chunk_type = "semantic-aware".to_string();
        }
        chunks
    }

    /// Fixed windows stepping by `chunk_size - overlap`.
    fn fixed_boundaries(&self, len: usize) -> Vec<(usize, usize)> {
        let step = self.chunk_size - self.overlap;
        let mut boundaries = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(len);
            boundaries.push((start, end));
            if end == len {
                break;
            }
            start += step;
        }
        boundaries
    }

    /// Split at declaration lines and at size overflow (with overlap carry).
    fn function_boundaries(
        &self,
        chars: &[char],
        file_path: Option<&str>,
    ) -> Vec<(usize, usize)> {
        let language = file_path.and_then(language_for);
        let declaration = declaration_regex(language);

        let mut boundaries = Vec::new();
        let mut chunk_start = 0;
        let mut pos = 0;

        for line in split_lines(chars) {
            let line_text: String = chars[line.0..line.1].iter().collect();
            let line_len = line.1 - line.0;

            let is_declaration = declaration.is_match(&line_text);
            let current_len = pos - chunk_start;

            if is_declaration && current_len > 0 {
                boundaries.push((chunk_start, pos));
                chunk_start = pos;
            } else if current_len + line_len > self.chunk_size && current_len > 0 {
                boundaries.push((chunk_start, pos));
                chunk_start = pos.saturating_sub(self.overlap).max(chunk_start);
            }
            pos = line.1;
        }

        if pos > chunk_start {
            boundaries.push((chunk_start, pos));
        }
        if boundaries.is_empty() {
            boundaries.push((0, chars.len()));
        }
        boundaries
    }

    /// Split on blank-line boundaries, with overflow overlap carry.
    fn paragraph_boundaries(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let paragraphs = split_paragraphs(chars);
        self.accumulate(chars.len(), paragraphs)
    }

    /// Sentence-based splitting for prose of unknown type.
    fn sentence_boundaries(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let text: String = chars.iter().collect();
        let mut sentences = Vec::new();
        let mut char_start = 0;
        let mut byte_to_char = 0;
        let mut last_byte = 0;

        for m in SENTENCE_END.find_iter(&text) {
            byte_to_char += text[last_byte..m.end()].chars().count();
            last_byte = m.end();
            sentences.push((char_start, byte_to_char));
            char_start = byte_to_char;
        }
        if char_start < chars.len() {
            sentences.push((char_start, chars.len()));
        }

        self.accumulate(chars.len(), sentences)
    }

    /// Accumulate units into chunks up to `chunk_size`, carrying `overlap`
    /// characters from the previous chunk on overflow.
    fn accumulate(&self, total_len: usize, units: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        let mut boundaries = Vec::new();
        let mut chunk_start = 0;
        let mut pos = 0;

        for (_, unit_end) in units {
            let unit_len = unit_end - pos;
            if pos - chunk_start + unit_len > self.chunk_size && pos > chunk_start {
                boundaries.push((chunk_start, pos));
                chunk_start = pos.saturating_sub(self.overlap).max(chunk_start);
            }
            pos = unit_end;
        }

        if pos > chunk_start || boundaries.is_empty() {
            boundaries.push((chunk_start, total_len.max(pos)));
        }
        boundaries
    }

    fn materialize(
        &self,
        chars: &[char],
        boundaries: Vec<(usize, usize)>,
        file_path: Option<&str>,
        label: &str,
    ) -> Vec<Chunk> {
        let language = file_path.and_then(language_for);
        boundaries
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| Chunk {
                content: chars[start..end].iter().collect(),
                metadata: ChunkMetadata {
                    start,
                    end,
                    source: file_path.map(|s| s.to_string()),
                    chunk_type: label.to_string(),
                    language: language.map(|s| s.to_string()),
                    chunk_index,
                },
            })
            .collect()
    }

    /// Compress a context to fit a token budget.
    ///
    /// Inputs under the budget pass through unchanged. Otherwise the result
    /// keeps ~40% of the character budget from the head, ~40% from the tail,
    /// and an extractive summary (first sentence of each skipped paragraph)
    /// in between, delimited by compression markers.
    pub fn create_sliding_window(&self, context: &str, max_tokens: usize) -> SlidingWindow {
        if estimate_tokens(context) <= max_tokens {
            return SlidingWindow {
                content: context.to_string(),
                total_chunks: 1,
                selected_chunks: 1,
            };
        }

        let chars: Vec<char> = context.chars().collect();
        let char_budget = (max_tokens as f64 * CHARS_PER_TOKEN) as usize;
        let head_len = (char_budget as f64 * 0.4) as usize;
        let tail_len = (char_budget as f64 * 0.4) as usize;
        let mut summary_budget = char_budget.saturating_sub(head_len + tail_len);

        let head: String = chars[..head_len.min(chars.len())].iter().collect();
        let tail_start = chars.len().saturating_sub(tail_len);
        let tail: String = chars[tail_start..].iter().collect();

        // Extractive summary over the compressed middle region.
        let middle: String = chars[head_len.min(chars.len())..tail_start].iter().collect();
        let paragraphs: Vec<&str> = middle
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .collect();
        let total_chunks = paragraphs.len() + 2;
        let mut selected = 2;
        let mut summary_lines = Vec::new();

        for paragraph in &paragraphs {
            if summary_budget == 0 {
                break;
            }
            let sentence = first_sentence(paragraph);
            let cost = sentence.chars().count();
            if cost > summary_budget {
                break;
            }
            summary_budget -= cost;
            summary_lines.push(sentence);
            selected += 1;
        }

        let skipped = paragraphs.len().saturating_sub(summary_lines.len());
        let mut content = head;
        content.push_str("\n\n[--- compressed ---]\n");
        for line in &summary_lines {
            content.push_str(line);
            content.push('\n');
        }
        if skipped > 0 {
            content.push_str(&format!("[... {skipped} sections omitted ...]\n"));
        }
        content.push_str("[--- end compressed ---]\n\n");
        content.push_str(&tail);

        SlidingWindow {
            content,
            total_chunks,
            selected_chunks: selected,
        }
    }
}

fn strategy_label(strategy: ChunkStrategy) -> &'static str {
    match strategy {
        ChunkStrategy::FixedSize => "fixed-size",
        ChunkStrategy::SemanticAware => "semantic-aware",
        ChunkStrategy::FunctionAware => "function-aware",
        ChunkStrategy::ParagraphAware => "paragraph-aware",
    }
}

/// Line spans (inclusive of the trailing newline) in char offsets.
fn split_lines(chars: &[char]) -> Vec<(usize, usize)> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, c) in chars.iter().enumerate() {
        if *c == '\n' {
            lines.push((start, i + 1));
            start = i + 1;
        }
    }
    if start < chars.len() {
        lines.push((start, chars.len()));
    }
    lines
}

/// Paragraph end positions: units ending after each blank-line run.
fn split_paragraphs(chars: &[char]) -> Vec<(usize, usize)> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\n' && i + 1 < chars.len() && chars[i + 1] == '\n' {
            let mut end = i + 1;
            while end < chars.len() && chars[end] == '\n' {
                end += 1;
            }
            units.push((start, end));
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }
    if start < chars.len() {
        units.push((start, chars.len()));
    }
    units
}

fn first_sentence(paragraph: &str) -> String {
    let trimmed = paragraph.trim();
    match SENTENCE_END.find(trimmed) {
        Some(m) => trimmed[..m.end()].trim_end().to_string(),
        None => trimmed.lines().next().unwrap_or("").to_string(),
    }
}
