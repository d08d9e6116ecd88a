//! Syntax-aligned split/merge chunking.
//!
//! Concepts become candidate chunks, oversized candidates are split at line
//! boundaries (preferring blank lines, then drops in indentation), small
//! adjacent chunks are greedily merged, and exact duplicates are dropped.
//! After the pipeline every chunk is at most `max_chunk_size` characters.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::EngineError;
use crate::error::Result;
use crate::parse::ConceptExtractor;
use crate::parse::ParseEngine;
use crate::types::Chunk;
use crate::types::ChunkType;
use crate::types::Language;

/// Chunking limits; sizes are in characters.
#[derive(Debug, Clone)]
pub struct CastConfig {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    /// Merge budget as a ratio of `max_chunk_size`.
    pub merge_threshold: f32,
    pub greedy_merge: bool,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1200,
            min_chunk_size: 50,
            merge_threshold: 0.8,
            greedy_merge: true,
        }
    }
}

/// Structure-aligned chunker.
pub struct CastChunker {
    config: CastConfig,
    engine: Arc<ParseEngine>,
}

impl CastChunker {
    pub fn new(config: CastConfig, engine: Arc<ParseEngine>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &CastConfig {
        &self.config
    }

    /// Chunk a file from disk.
    pub fn chunk_file(&self, path: &Path, language: Language) -> Result<Vec<Chunk>> {
        let source = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Ok(self.chunk_source(path, &source, language))
    }

    /// Chunk a source buffer: parse, extract concepts, apply the pipeline.
    pub fn chunk_source(&self, path: &Path, source: &str, language: Language) -> Vec<Chunk> {
        if source.trim().is_empty() {
            return Vec::new();
        }

        let candidates = match self.engine.parse(source.as_bytes(), language) {
            Some(tree) => {
                let concepts =
                    ConceptExtractor::new(language).extract(&tree, source.as_bytes());
                concepts
                    .into_iter()
                    .filter(|c| !c.code.trim().is_empty())
                    .map(|c| Chunk {
                        id: None,
                        symbol: c.symbol().to_string(),
                        chunk_type: c.chunk_type(),
                        language,
                        file_path: path.to_path_buf(),
                        start_line: c.start_line,
                        end_line: c.end_line,
                        code: c.code.clone(),
                        parent_header: c.parent_header().map(str::to_string),
                        metadata: BTreeMap::new(),
                        created_at: None,
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        if candidates.is_empty() {
            // No recognizable structure: the whole file becomes one block so
            // that its content is still retrievable.
            return self.apply(vec![whole_file_chunk(path, source, language)]);
        }

        self.apply(candidates)
    }

    /// The split → merge → dedupe pipeline over candidate chunks.
    fn apply(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        if chunks.is_empty() {
            return chunks;
        }

        let mut split: Vec<Chunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.size() > self.config.max_chunk_size {
                split.extend(self.split_chunk(chunk));
            } else {
                split.push(chunk);
            }
        }

        split.sort_by(|a, b| {
            (a.file_path.as_path(), a.start_line, a.end_line)
                .cmp(&(b.file_path.as_path(), b.start_line, b.end_line))
        });

        let merged = if self.config.greedy_merge {
            self.greedy_merge(split)
        } else {
            split
        };

        deduplicate(merged)
    }

    /// Split an oversized chunk at line boundaries.
    ///
    /// Boundary preference inside the size window: the last blank line, then
    /// the last line returning to the indentation of the chunk start, then a
    /// plain line cut. Line numbers stay absolute; pieces are named
    /// `"{symbol}.part{i}"`.
    fn split_chunk(&self, chunk: Chunk) -> Vec<Chunk> {
        let max = self.config.max_chunk_size;
        let lines: Vec<&str> = chunk.code.split('\n').collect();
        let base_indent = indent_width(lines.first().copied().unwrap_or(""));

        let mut pieces: Vec<(usize, usize)> = Vec::new(); // line index ranges, end exclusive
        let mut start = 0;
        while start < lines.len() {
            let mut size = 0;
            let mut end = start;
            let mut last_blank: Option<usize> = None;
            let mut last_dedent: Option<usize> = None;

            while end < lines.len() {
                let line_len = lines[end].chars().count() + usize::from(end > start);
                if size + line_len > max && end > start {
                    break;
                }
                size += line_len;
                if lines[end].trim().is_empty() {
                    last_blank = Some(end);
                } else if end > start && indent_width(lines[end]) <= base_indent {
                    last_dedent = Some(end);
                }
                end += 1;
            }

            if end == start {
                // A single line exceeding the limit: hard-split by characters.
                pieces.push((start, start + 1));
                start += 1;
                continue;
            }

            // Prefer a structural boundary when the window stopped short.
            if end < lines.len() {
                if let Some(blank) = last_blank {
                    if blank > start {
                        end = blank + 1;
                    }
                } else if let Some(dedent) = last_dedent {
                    if dedent > start {
                        end = dedent;
                    }
                }
            }

            pieces.push((start, end));
            start = end;
        }

        let mut result = Vec::new();
        let mut part = 1;
        for (from, to) in pieces {
            let body = lines[from..to].join("\n");
            if body.chars().count() > max {
                // Oversized single line: cut into fixed-size character runs.
                let line_no = chunk.start_line + from as i32;
                for piece in char_windows(&body, max) {
                    result.push(piece_chunk(&chunk, &piece, part, line_no, line_no));
                    part += 1;
                }
            } else {
                let start_line = chunk.start_line + from as i32;
                let end_line = chunk.start_line + to as i32 - 1;
                if body.trim().is_empty() {
                    // Whitespace-only window: fold into the previous piece
                    // when it fits so line ranges stay contiguous.
                    if let Some(prev) = result.last_mut() {
                        if prev.size() + 1 + body.chars().count() <= max {
                            prev.code.push('\n');
                            prev.code.push_str(&body);
                            prev.end_line = end_line;
                            continue;
                        }
                    } else {
                        continue;
                    }
                }
                result.push(piece_chunk(&chunk, &body, part, start_line, end_line));
                part += 1;
            }
        }

        // Splitting a chunk must cover its original span.
        if let Some(first) = result.first_mut() {
            first.start_line = chunk.start_line;
        }
        if let Some(last) = result.last_mut() {
            last.end_line = chunk.end_line;
        }

        result
    }

    /// Merge adjacent small chunks left-to-right.
    ///
    /// Chunks merge only within one file, only when line-adjacent, and only
    /// while the combined size stays within `max_chunk_size *
    /// merge_threshold`. Classes never merge with functions unless both are
    /// below `min_chunk_size`.
    fn greedy_merge(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let budget =
            (self.config.max_chunk_size as f32 * self.config.merge_threshold) as usize;

        let mut result: Vec<Chunk> = Vec::with_capacity(chunks.len());
        for next in chunks {
            let Some(current) = result.last_mut() else {
                result.push(next);
                continue;
            };

            let adjacent = current.file_path == next.file_path
                && next.start_line == current.end_line + 1;
            let combined = current.size() + 1 + next.size();
            let types_compatible = self.mergeable_types(current, &next);

            if adjacent && combined <= budget && types_compatible {
                current.symbol = format!("{}+{}", current.symbol, next.symbol);
                current.code.push('\n');
                current.code.push_str(&next.code);
                current.end_line = next.end_line;
                if current.chunk_type != next.chunk_type {
                    current.chunk_type = ChunkType::Block;
                }
            } else {
                result.push(next);
            }
        }
        result
    }

    fn mergeable_types(&self, a: &Chunk, b: &Chunk) -> bool {
        let class_function_mix = matches!(
            (a.chunk_type, b.chunk_type),
            (ChunkType::Class, ChunkType::Function | ChunkType::Method)
                | (ChunkType::Function | ChunkType::Method, ChunkType::Class)
        );
        if !class_function_mix {
            return true;
        }
        a.size() < self.config.min_chunk_size && b.size() < self.config.min_chunk_size
    }
}

/// Drop chunks whose code is byte-identical to an earlier one.
fn deduplicate(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen: HashSet<String> = HashSet::with_capacity(chunks.len());
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.code.clone()))
        .collect()
}

fn whole_file_chunk(path: &Path, source: &str, language: Language) -> Chunk {
    let line_count = source.lines().count().max(1) as i32;
    let symbol = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    Chunk {
        id: None,
        symbol,
        chunk_type: ChunkType::Block,
        language,
        file_path: path.to_path_buf(),
        start_line: 1,
        end_line: line_count,
        code: source.to_string(),
        parent_header: None,
        metadata: BTreeMap::new(),
        created_at: None,
    }
}

fn piece_chunk(parent: &Chunk, code: &str, part: usize, start_line: i32, end_line: i32) -> Chunk {
    Chunk {
        id: None,
        symbol: format!("{}.part{part}", parent.symbol),
        chunk_type: parent.chunk_type,
        language: parent.language,
        file_path: parent.file_path.clone(),
        start_line,
        end_line: end_line.max(start_line),
        code: code.to_string(),
        parent_header: parent.parent_header.clone(),
        metadata: parent.metadata.clone(),
        created_at: None,
    }
}

fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn char_windows(s: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars
        .chunks(size)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn chunker(config: CastConfig) -> CastChunker {
        CastChunker::new(config, Arc::new(ParseEngine::new()))
    }

    fn make_chunk(symbol: &str, path: &str, start: i32, end: i32, code: String) -> Chunk {
        Chunk {
            id: None,
            symbol: symbol.to_string(),
            chunk_type: ChunkType::Function,
            language: Language::Python,
            file_path: PathBuf::from(path),
            start_line: start,
            end_line: end,
            code,
            parent_header: None,
            metadata: BTreeMap::new(),
            created_at: None,
        }
    }

    #[test]
    fn test_split_respects_size_bound() {
        let c = chunker(CastConfig {
            max_chunk_size: 100,
            min_chunk_size: 20,
            greedy_merge: false,
            ..CastConfig::default()
        });

        let code: String = (0..50)
            .map(|i| format!("    print('Line {i}')"))
            .collect::<Vec<_>>()
            .join("\n");
        let large = make_chunk("large_function", "test.py", 1, 50, code);

        let result = c.apply(vec![large]);
        assert!(result.len() > 1);
        for chunk in &result {
            assert!(chunk.size() <= 100, "{} chars", chunk.size());
            assert!(chunk.symbol.contains("part"));
        }
    }

    #[test]
    fn test_split_preserves_absolute_line_numbers() {
        let c = chunker(CastConfig {
            max_chunk_size: 50,
            greedy_merge: false,
            ..CastConfig::default()
        });

        let code: String = (0..20)
            .map(|i| format!("line{i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunk = make_chunk("test", "test.py", 10, 29, code);

        let result = c.split_chunk(chunk);
        assert_eq!(result.first().unwrap().start_line, 10);
        assert_eq!(result.last().unwrap().end_line, 29);
        for pair in result.windows(2) {
            assert!(pair[0].end_line + 1 >= pair[1].start_line);
            assert!(pair[1].start_line > pair[0].start_line);
        }
    }

    #[test]
    fn test_split_prefers_blank_line_boundaries() {
        let c = chunker(CastConfig {
            max_chunk_size: 30,
            greedy_merge: false,
            ..CastConfig::default()
        });

        let code = "\ndef func1():\n    pass\n\ndef func2():\n    pass\n";
        let chunk = make_chunk("module", "test.py", 1, 7, code.to_string());

        let result = c.split_chunk(chunk);
        assert!(!result.is_empty());
        for piece in &result {
            assert!(piece.size() <= 30);
        }
    }

    #[test]
    fn test_merge_combines_small_adjacent() {
        let c = chunker(CastConfig {
            max_chunk_size: 500,
            merge_threshold: 0.8,
            greedy_merge: true,
            ..CastConfig::default()
        });

        let a = make_chunk("func1", "test.py", 1, 5, "def func1():\n    return 1".to_string());
        let b = make_chunk("func2", "test.py", 6, 10, "def func2():\n    return 2".to_string());

        let result = c.greedy_merge(vec![a, b]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].symbol, "func1+func2");
        assert_eq!(result[0].start_line, 1);
        assert_eq!(result[0].end_line, 10);
    }

    #[test]
    fn test_merge_respects_size_budget() {
        let c = chunker(CastConfig {
            max_chunk_size: 100,
            merge_threshold: 0.8,
            greedy_merge: true,
            ..CastConfig::default()
        });

        let body: String = (0..30).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let a = make_chunk("func1", "test.py", 1, 30, body.clone());
        let b = make_chunk("func2", "test.py", 31, 60, body);

        let result = c.greedy_merge(vec![a, b]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_merge_requires_adjacency() {
        let c = chunker(CastConfig::default());
        let a = make_chunk("func1", "test.py", 1, 5, "def func1(): pass".to_string());
        let b = make_chunk("func2", "test.py", 20, 25, "def func2(): pass".to_string());

        let result = c.greedy_merge(vec![a, b]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_merge_never_crosses_files() {
        let c = chunker(CastConfig::default());
        let a = make_chunk("func1", "file1.py", 1, 5, "def func1(): pass".to_string());
        let b = make_chunk("func2", "file2.py", 6, 10, "def func2(): pass".to_string());

        let result = c.greedy_merge(vec![a, b]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_merge_does_not_mix_class_with_large_function() {
        let c = chunker(CastConfig {
            max_chunk_size: 2000,
            min_chunk_size: 10,
            merge_threshold: 0.9,
            greedy_merge: true,
        });

        let mut class_chunk =
            make_chunk("Widget", "test.py", 1, 5, "class Widget:\n    field = 1".to_string());
        class_chunk.chunk_type = ChunkType::Class;
        let func = make_chunk(
            "render",
            "test.py",
            6,
            10,
            "def render():\n    return template".to_string(),
        );

        let result = c.greedy_merge(vec![class_chunk, func]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_merge_allows_tiny_class_function_pairs() {
        let c = chunker(CastConfig {
            max_chunk_size: 2000,
            min_chunk_size: 50,
            merge_threshold: 0.9,
            greedy_merge: true,
        });

        let mut tiny_class = make_chunk("W", "test.py", 1, 1, "class W: pass".to_string());
        tiny_class.chunk_type = ChunkType::Class;
        let tiny_func = make_chunk("f", "test.py", 2, 2, "def f(): pass".to_string());

        let result = c.greedy_merge(vec![tiny_class, tiny_func]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk_type, ChunkType::Block);
    }

    #[test]
    fn test_deduplicate_keeps_first() {
        let a = make_chunk("func", "test.py", 1, 3, "def func():\n    return 1".to_string());
        let b = make_chunk("func_copy", "test.py", 10, 12, "def func():\n    return 1".to_string());
        let c = make_chunk("other", "test.py", 20, 22, "def other():\n    return 2".to_string());

        let result = deduplicate(vec![a, b, c]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].symbol, "func");
    }

    #[test]
    fn test_pipeline_empty_input() {
        let c = chunker(CastConfig::default());
        assert!(c.apply(Vec::new()).is_empty());
    }

    #[test]
    fn test_pipeline_passes_well_sized_chunk_through() {
        let c = chunker(CastConfig {
            max_chunk_size: 500,
            greedy_merge: true,
            ..CastConfig::default()
        });
        let chunk = make_chunk("func", "test.py", 1, 10, "def func():\n    return 42".to_string());

        let result = c.apply(vec![chunk]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].symbol, "func");
    }

    #[test]
    fn test_split_then_merge_integration() {
        let c = chunker(CastConfig {
            max_chunk_size: 100,
            min_chunk_size: 20,
            merge_threshold: 0.9,
            greedy_merge: true,
        });

        let code: String = (0..50).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let chunk = make_chunk("large", "test.py", 1, 50, code);

        let result = c.apply(vec![chunk]);
        assert!(result.len() > 1);
        for piece in &result {
            assert!(piece.size() <= 100);
        }
    }

    #[test]
    fn test_chunk_source_python_two_functions() {
        let c = chunker(CastConfig {
            greedy_merge: false,
            ..CastConfig::default()
        });
        let source = "def alpha():\n    return 1\n\ndef beta():\n    return 2\n";
        let chunks = c.chunk_source(Path::new("a.py"), source, Language::Python);

        let symbols: Vec<&str> = chunks.iter().map(|c| c.symbol.as_str()).collect();
        assert!(symbols.contains(&"alpha"));
        assert!(symbols.contains(&"beta"));
    }

    #[test]
    fn test_chunk_source_unstructured_falls_back_to_block() {
        let c = chunker(CastConfig::default());
        let chunks = c.chunk_source(Path::new("data.py"), "x = 1\ny = 2\n", Language::Python);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Block);
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn test_chunk_source_empty_is_empty() {
        let c = chunker(CastConfig::default());
        assert!(c.chunk_source(Path::new("e.py"), "", Language::Python).is_empty());
        assert!(c.chunk_source(Path::new("e.py"), "   \n", Language::Python).is_empty());
    }

    #[test]
    fn test_class_body_preserved() {
        let c = chunker(CastConfig {
            max_chunk_size: 500,
            greedy_merge: false,
            ..CastConfig::default()
        });
        let source = "class MyClass:\n    def method1(self):\n        return 1\n";
        let chunks = c.chunk_source(Path::new("t.py"), source, Language::Python);
        assert!(chunks.iter().any(|ch| ch.code.contains("class MyClass")));
    }

    #[test]
    fn test_oversized_single_line_is_hard_split() {
        let c = chunker(CastConfig {
            max_chunk_size: 50,
            greedy_merge: false,
            ..CastConfig::default()
        });
        let chunk = make_chunk("wide", "t.py", 1, 1, "x".repeat(160));
        let result = c.apply(vec![chunk]);
        assert!(result.len() >= 3);
        for piece in &result {
            assert!(piece.size() <= 50);
        }
    }
}
