//! Parse engine over tree-sitter.
//!
//! Grammars are registered once at construction; parsing a buffer creates a
//! fresh `tree_sitter::Parser` (parsers are cheap, grammars are shared).

use std::collections::HashMap;

use tree_sitter::Parser;
use tree_sitter::Tree;

use crate::types::Language;

/// Registry of tree-sitter grammars keyed by language.
pub struct ParseEngine {
    grammars: HashMap<Language, tree_sitter::Language>,
}

impl ParseEngine {
    /// Register all supported grammars.
    pub fn new() -> Self {
        let mut grammars = HashMap::new();
        grammars.insert(Language::Python, tree_sitter_python::LANGUAGE.into());
        grammars.insert(
            Language::JavaScript,
            tree_sitter_javascript::LANGUAGE.into(),
        );
        grammars.insert(
            Language::TypeScript,
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        );
        grammars.insert(Language::Tsx, tree_sitter_typescript::LANGUAGE_TSX.into());
        grammars.insert(Language::Go, tree_sitter_go::LANGUAGE.into());
        grammars.insert(Language::Rust, tree_sitter_rust::LANGUAGE.into());
        grammars.insert(Language::Java, tree_sitter_java::LANGUAGE.into());
        grammars.insert(Language::C, tree_sitter_c::LANGUAGE.into());
        grammars.insert(Language::Cpp, tree_sitter_cpp::LANGUAGE.into());
        grammars.insert(Language::CSharp, tree_sitter_c_sharp::LANGUAGE.into());
        grammars.insert(Language::Ruby, tree_sitter_ruby::LANGUAGE.into());
        grammars.insert(Language::Php, tree_sitter_php::LANGUAGE_PHP.into());
        Self { grammars }
    }

    /// Whether a grammar is registered for `language`.
    pub fn is_supported(&self, language: Language) -> bool {
        self.grammars.contains_key(&language)
    }

    /// Languages with a registered grammar.
    pub fn supported_languages(&self) -> Vec<Language> {
        let mut langs: Vec<Language> = self.grammars.keys().copied().collect();
        langs.sort_by_key(|l| l.as_str());
        langs
    }

    /// Parse a source buffer.
    ///
    /// Returns `None` for unsupported languages or parser failures; a file
    /// that fails to parse never aborts a batch.
    pub fn parse(&self, source: &[u8], language: Language) -> Option<Tree> {
        let grammar = self.grammars.get(&language)?;

        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(grammar) {
            tracing::warn!(language = %language, error = %e, "Grammar rejected by parser");
            return None;
        }

        parser.parse(source, None)
    }
}

impl Default for ParseEngine {
    fn default() -> Self {
        Self::new()
    }
}
