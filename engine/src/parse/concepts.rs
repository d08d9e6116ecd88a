//! Concept extraction from syntax trees.
//!
//! A single traversal emits a stream of [`UniversalConcept`]s: definitions
//! (functions, methods, classes), comments and imports, each with byte and
//! line spans. Per-language node-kind tables keep the walker generic;
//! idioms (nested classes, arrow-function binding names, interface
//! declarations) are handled in the name resolution helpers.

use tree_sitter::Node;
use tree_sitter::Tree;

use crate::types::ChunkType;
use crate::types::Language;

/// What a concept is, as a sum over the concept categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptKind {
    /// A named definition (function, method, class).
    Definition {
        chunk_type: ChunkType,
        symbol: String,
        parent_header: Option<String>,
    },
    /// A source comment.
    Comment,
    /// An import/use/include statement.
    Import,
    /// A reference to an entity defined elsewhere.
    Reference { symbol: String },
}

/// A semantic concept extracted from a syntax tree.
#[derive(Debug, Clone)]
pub struct UniversalConcept {
    pub kind: ConceptKind,
    /// 1-indexed, inclusive.
    pub start_line: i32,
    pub end_line: i32,
    pub start_byte: usize,
    pub end_byte: usize,
    pub code: String,
}

impl UniversalConcept {
    /// Symbol under which this concept is indexed.
    pub fn symbol(&self) -> &str {
        match &self.kind {
            ConceptKind::Definition { symbol, .. } => symbol,
            ConceptKind::Comment => "comment",
            ConceptKind::Import => "import",
            ConceptKind::Reference { symbol } => symbol,
        }
    }

    /// Chunk type this concept maps to.
    pub fn chunk_type(&self) -> ChunkType {
        match &self.kind {
            ConceptKind::Definition { chunk_type, .. } => *chunk_type,
            ConceptKind::Comment => ChunkType::Comment,
            ConceptKind::Import | ConceptKind::Reference { .. } => ChunkType::Block,
        }
    }

    /// Enclosing class name, when known.
    pub fn parent_header(&self) -> Option<&str> {
        match &self.kind {
            ConceptKind::Definition { parent_header, .. } => parent_header.as_deref(),
            _ => None,
        }
    }
}

/// Node-kind tables for one language.
struct LanguageSpec {
    functions: &'static [&'static str],
    classes: &'static [&'static str],
    comments: &'static [&'static str],
    imports: &'static [&'static str],
}

fn spec_for(language: Language) -> LanguageSpec {
    match language {
        Language::Python => LanguageSpec {
            functions: &["function_definition"],
            classes: &["class_definition"],
            comments: &["comment"],
            imports: &["import_statement", "import_from_statement"],
        },
        Language::JavaScript | Language::TypeScript | Language::Tsx => LanguageSpec {
            functions: &[
                "function_declaration",
                "generator_function_declaration",
                "arrow_function",
                "function_expression",
                "method_definition",
            ],
            classes: &[
                "class_declaration",
                "interface_declaration",
                "type_alias_declaration",
                "enum_declaration",
            ],
            comments: &["comment"],
            imports: &["import_statement"],
        },
        Language::Go => LanguageSpec {
            functions: &["function_declaration", "method_declaration"],
            classes: &["type_declaration"],
            comments: &["comment"],
            imports: &["import_declaration"],
        },
        Language::Rust => LanguageSpec {
            functions: &["function_item"],
            classes: &["struct_item", "enum_item", "trait_item", "impl_item"],
            comments: &["line_comment", "block_comment"],
            imports: &["use_declaration"],
        },
        Language::Java => LanguageSpec {
            functions: &["method_declaration", "constructor_declaration"],
            classes: &[
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
            ],
            comments: &["line_comment", "block_comment"],
            imports: &["import_declaration"],
        },
        Language::C => LanguageSpec {
            functions: &["function_definition"],
            classes: &["struct_specifier", "enum_specifier"],
            comments: &["comment"],
            imports: &["preproc_include"],
        },
        Language::Cpp => LanguageSpec {
            functions: &["function_definition"],
            classes: &["class_specifier", "struct_specifier", "enum_specifier"],
            comments: &["comment"],
            imports: &["preproc_include"],
        },
        Language::CSharp => LanguageSpec {
            functions: &[
                "method_declaration",
                "constructor_declaration",
                "local_function_statement",
            ],
            classes: &[
                "class_declaration",
                "interface_declaration",
                "struct_declaration",
                "enum_declaration",
            ],
            comments: &["comment"],
            imports: &["using_directive"],
        },
        Language::Ruby => LanguageSpec {
            functions: &["method", "singleton_method"],
            classes: &["class", "module"],
            comments: &["comment"],
            imports: &[],
        },
        Language::Php => LanguageSpec {
            functions: &["function_definition", "method_declaration"],
            classes: &[
                "class_declaration",
                "interface_declaration",
                "trait_declaration",
            ],
            comments: &["comment"],
            imports: &["namespace_use_declaration"],
        },
        Language::Unknown => LanguageSpec {
            functions: &[],
            classes: &[],
            comments: &[],
            imports: &[],
        },
    }
}

/// Extracts semantic concepts from a parsed tree.
pub struct ConceptExtractor {
    language: Language,
}

impl ConceptExtractor {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    /// Walk the tree once and emit all concepts in document order.
    pub fn extract(&self, tree: &Tree, source: &[u8]) -> Vec<UniversalConcept> {
        let spec = spec_for(self.language);
        let mut concepts = Vec::new();
        self.walk(tree.root_node(), source, &spec, None, &mut concepts);
        concepts
    }

    fn walk(
        &self,
        node: Node<'_>,
        source: &[u8],
        spec: &LanguageSpec,
        parent_class: Option<&str>,
        out: &mut Vec<UniversalConcept>,
    ) {
        let kind = node.kind();

        if spec.classes.contains(&kind) {
            let symbol = self
                .node_name(node, source)
                .unwrap_or_else(|| "anonymous".to_string());
            out.push(make_concept(
                node,
                source,
                ConceptKind::Definition {
                    chunk_type: ChunkType::Class,
                    symbol: symbol.clone(),
                    parent_header: parent_class.map(str::to_string),
                },
            ));
            // Descend with class context so nested definitions become
            // methods carrying the enclosing name.
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    self.walk(child, source, spec, Some(symbol.as_str()), out);
                }
            }
            return;
        }

        if spec.functions.contains(&kind) {
            let symbol = self
                .node_name(node, source)
                .unwrap_or_else(|| "anonymous".to_string());
            let chunk_type = if parent_class.is_some() {
                ChunkType::Method
            } else {
                ChunkType::Function
            };
            out.push(make_concept(
                node,
                source,
                ConceptKind::Definition {
                    chunk_type,
                    symbol,
                    parent_header: parent_class.map(str::to_string),
                },
            ));
            // Do not descend: nested closures stay part of their parent.
            return;
        }

        if spec.comments.contains(&kind) {
            out.push(make_concept(node, source, ConceptKind::Comment));
            return;
        }

        if spec.imports.contains(&kind) {
            out.push(make_concept(node, source, ConceptKind::Import));
            return;
        }

        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                self.walk(child, source, spec, parent_class, out);
            }
        }
    }

    /// Resolve the name of a definition node.
    fn node_name(&self, node: Node<'_>, source: &[u8]) -> Option<String> {
        if let Some(name) = field_text(node, "name", source) {
            return Some(name);
        }

        match (self.language, node.kind()) {
            // Rust impl blocks are named after the implemented type.
            (Language::Rust, "impl_item") => field_text(node, "type", source),
            // Go wraps the name inside a type_spec child.
            (Language::Go, "type_declaration") => {
                for i in 0..node.named_child_count() {
                    if let Some(spec) = node.named_child(i) {
                        if spec.kind() == "type_spec" {
                            return field_text(spec, "name", source);
                        }
                    }
                }
                None
            }
            // Arrow functions and function expressions inherit the name of
            // the binding or property they are assigned to.
            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "arrow_function" | "function_expression",
            ) => {
                let parent = node.parent()?;
                match parent.kind() {
                    "variable_declarator" => field_text(parent, "name", source),
                    "assignment_expression" => field_text(parent, "left", source),
                    "pair" => field_text(parent, "key", source),
                    _ => None,
                }
            }
            // C/C++ function names sit inside the declarator.
            (Language::C | Language::Cpp, "function_definition") => {
                let declarator = node.child_by_field_name("declarator")?;
                find_identifier(declarator, source)
            }
            _ => None,
        }
    }
}

fn field_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    let child = node.child_by_field_name(field)?;
    child.utf8_text(source).ok().map(str::to_string)
}

/// First identifier-like descendant, depth-first.
fn find_identifier(node: Node<'_>, source: &[u8]) -> Option<String> {
    if matches!(
        node.kind(),
        "identifier" | "field_identifier" | "qualified_identifier"
    ) {
        return node.utf8_text(source).ok().map(str::to_string);
    }
    for i in 0..node.child_count() {
        if let Some(found) = node.child(i).and_then(|c| find_identifier(c, source)) {
            return Some(found);
        }
    }
    None
}

fn make_concept(node: Node<'_>, source: &[u8], kind: ConceptKind) -> UniversalConcept {
    let code = node
        .utf8_text(source)
        .unwrap_or_default()
        .to_string();
    UniversalConcept {
        kind,
        start_line: node.start_position().row as i32 + 1,
        end_line: node.end_position().row as i32 + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::ParseEngine;

    fn extract(source: &str, language: Language) -> Vec<UniversalConcept> {
        let engine = ParseEngine::new();
        let tree = engine.parse(source.as_bytes(), language).unwrap();
        ConceptExtractor::new(language).extract(&tree, source.as_bytes())
    }

    #[test]
    fn test_python_function_and_class() {
        let source = "def alpha():\n    return 1\n\nclass Widget:\n    def render(self):\n        pass\n";
        let concepts = extract(source, Language::Python);

        let symbols: Vec<&str> = concepts.iter().map(|c| c.symbol()).collect();
        assert!(symbols.contains(&"alpha"));
        assert!(symbols.contains(&"Widget"));
        assert!(symbols.contains(&"render"));

        let render = concepts.iter().find(|c| c.symbol() == "render").unwrap();
        assert_eq!(render.chunk_type(), ChunkType::Method);
        assert_eq!(render.parent_header(), Some("Widget"));

        let alpha = concepts.iter().find(|c| c.symbol() == "alpha").unwrap();
        assert_eq!(alpha.chunk_type(), ChunkType::Function);
        assert_eq!(alpha.start_line, 1);
        assert_eq!(alpha.end_line, 2);
    }

    #[test]
    fn test_python_comment_and_import() {
        let source = "# top comment\nimport os\n";
        let concepts = extract(source, Language::Python);
        assert!(concepts.iter().any(|c| c.kind == ConceptKind::Comment));
        assert!(concepts.iter().any(|c| c.kind == ConceptKind::Import));
    }

    #[test]
    fn test_nested_class_propagates_parent() {
        let source = "class Outer:\n    class Inner:\n        def m(self):\n            pass\n";
        let concepts = extract(source, Language::Python);

        let inner = concepts.iter().find(|c| c.symbol() == "Inner").unwrap();
        assert_eq!(inner.parent_header(), Some("Outer"));

        let m = concepts.iter().find(|c| c.symbol() == "m").unwrap();
        assert_eq!(m.parent_header(), Some("Inner"));
    }

    #[test]
    fn test_arrow_function_inherits_binding_name() {
        let source = "const handler = (req) => {\n  return req.body;\n};\n";
        let concepts = extract(source, Language::JavaScript);
        let handler = concepts
            .iter()
            .find(|c| matches!(&c.kind, ConceptKind::Definition { .. }))
            .unwrap();
        assert_eq!(handler.symbol(), "handler");
    }

    #[test]
    fn test_typescript_interface_maps_to_class() {
        let source = "interface Shape {\n  area(): number;\n}\n";
        let concepts = extract(source, Language::TypeScript);
        let shape = concepts.iter().find(|c| c.symbol() == "Shape").unwrap();
        assert_eq!(shape.chunk_type(), ChunkType::Class);
    }

    #[test]
    fn test_rust_items() {
        let source = "struct Point { x: i32 }\n\nimpl Point {\n    fn norm(&self) -> i32 { self.x }\n}\n\nfn free() {}\n";
        let concepts = extract(source, Language::Rust);

        let point = concepts.iter().find(|c| c.symbol() == "Point").unwrap();
        assert_eq!(point.chunk_type(), ChunkType::Class);

        let norm = concepts.iter().find(|c| c.symbol() == "norm").unwrap();
        assert_eq!(norm.chunk_type(), ChunkType::Method);
        assert_eq!(norm.parent_header(), Some("Point"));

        let free = concepts.iter().find(|c| c.symbol() == "free").unwrap();
        assert_eq!(free.chunk_type(), ChunkType::Function);
    }

    #[test]
    fn test_go_function_and_type() {
        let source = "package main\n\ntype Server struct{}\n\nfunc Run() {}\n";
        let concepts = extract(source, Language::Go);
        assert!(concepts.iter().any(|c| c.symbol() == "Server"));
        assert!(concepts.iter().any(|c| c.symbol() == "Run"));
    }

    #[test]
    fn test_c_function_name_from_declarator() {
        let source = "int add(int a, int b) {\n    return a + b;\n}\n";
        let concepts = extract(source, Language::C);
        let add = concepts
            .iter()
            .find(|c| matches!(&c.kind, ConceptKind::Definition { .. }))
            .unwrap();
        assert_eq!(add.symbol(), "add");
    }

    #[test]
    fn test_anonymous_function_gets_placeholder() {
        let source = "var x = [1].map(function (v) { return v; });\n";
        let concepts = extract(source, Language::JavaScript);
        assert!(concepts.iter().any(|c| c.symbol() == "anonymous"));
    }
}
