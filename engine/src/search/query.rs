//! Query preprocessing.
//!
//! Two modes feed the lexical index: natural-language questions get stop
//! words stripped while code identifiers survive, and raw code snippets get
//! decomposed into their identifier terms.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").expect("identifier regex"));

static API_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_]*").expect("api call regex")
});

/// Stop and question words stripped from natural-language queries.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "what", "how", "when", "where", "which", "who", "why", "the", "a", "an", "is", "are",
        "was", "were", "be", "been", "does", "do", "did", "can", "could", "should", "would",
        "will", "in", "on", "at", "of", "to", "for", "with", "and", "or", "not", "this", "that",
        "these", "those", "it", "its", "about", "into", "from", "by", "as", "work", "works",
    ])
});

/// Language keywords excluded from entity extraction and code queries.
static KEYWORD_BLOCKLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "def", "class", "import", "from", "return", "if", "else", "elif", "for", "while", "try",
        "except", "with", "as", "self", "true", "false", "none", "null", "var", "let", "const",
        "function", "this", "super", "new", "pub", "use", "impl", "struct", "enum", "trait",
        "match", "async", "await", "static", "public", "private", "protected", "void", "int",
        "string", "bool", "package", "func", "type", "interface", "extends", "implements",
    ])
});

/// Does a token look like a code identifier the author typed deliberately?
///
/// snake_case, CamelCase and ALL_CAPS tokens of length >= 2 qualify.
pub fn is_identifier_like(token: &str) -> bool {
    if token.len() < 2 {
        return false;
    }
    let snake = token.contains('_');
    // An interior uppercase distinguishes CamelCase from a merely
    // capitalized word ("HttpClient" yes, "What" no).
    let camel = token.chars().any(|c| c.is_lowercase())
        && token.chars().skip(1).any(|c| c.is_uppercase());
    let all_caps =
        token.chars().all(|c| c.is_uppercase() || c.is_ascii_digit()) && token.len() >= 2;
    snake || camel || all_caps
}

/// Natural-language mode: strip stop and question words, keep everything
/// that looks like an identifier, stem the plain English words.
///
/// Stemming maps word forms onto the subword tokens the text index holds
/// ("loading" → "load" reaches `load_config`). Identifiers pass through
/// untouched.
pub fn preprocess_natural_language(query: &str) -> String {
    use rust_stemmers::Algorithm;
    use rust_stemmers::Stemmer;

    let stemmer = Stemmer::create(Algorithm::English);

    let kept: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .filter(|t| is_identifier_like(t) || !STOP_WORDS.contains(t.to_lowercase().as_str()))
        .map(|t| {
            if !is_identifier_like(t) && t.chars().all(|c| c.is_ascii_alphabetic()) {
                stemmer.stem(&t.to_lowercase()).to_string()
            } else {
                t.to_string()
            }
        })
        .collect();
    kept.join(" ")
}

/// Code mode: extract identifier terms from a code snippet.
///
/// CamelCase is split into subwords, snake_case on underscores, call
/// patterns `a.b` contribute both `a b` and `b`; terms are deduplicated
/// case-insensitively preserving order and capped at 30.
pub fn preprocess_code_query(code: &str) -> String {
    let mut terms: Vec<String> = Vec::new();

    for m in IDENT_RE.find_iter(code) {
        let ident = m.as_str();
        if KEYWORD_BLOCKLIST.contains(ident.to_lowercase().as_str()) {
            continue;
        }

        let camel_parts = split_camel_case(ident);
        if camel_parts.len() > 1 {
            terms.extend(camel_parts);
        }

        let snake_parts: Vec<&str> = ident.split('_').filter(|p| p.len() > 1).collect();
        if snake_parts.len() > 1 {
            terms.extend(snake_parts.iter().map(|p| (*p).to_string()));
        }

        terms.push(ident.to_string());
    }

    for m in API_CALL_RE.find_iter(code) {
        let call = m.as_str();
        terms.push(call.replace('.', " "));
        if let Some(last) = call.rsplit('.').next() {
            terms.push(last.to_string());
        }
    }

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for term in terms {
        let key = term.to_lowercase();
        if term.len() > 1 && seen.insert(key) {
            unique.push(term);
        }
        if unique.len() == 30 {
            break;
        }
    }
    unique.join(" ")
}

/// Split a CamelCase identifier into its words.
///
/// Acronym runs stay together: `parseHTTPResponse` yields
/// `["parse", "HTTP", "Response"]`.
fn split_camel_case(ident: &str) -> Vec<String> {
    let chars: Vec<char> = ident.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || (prev.is_uppercase() && next_lower) {
                parts.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Candidate entities for multi-hop expansion: identifiers from the symbol
/// and the code body, minus language keywords.
pub fn extract_entities(symbol: &str, code: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    for m in IDENT_RE
        .find_iter(symbol)
        .chain(IDENT_RE.find_iter(code))
    {
        let ident = m.as_str();
        if KEYWORD_BLOCKLIST.contains(ident.to_lowercase().as_str()) {
            continue;
        }
        if seen.insert(ident.to_string()) {
            entities.push(ident.to_string());
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier_like() {
        assert!(is_identifier_like("load_config"));
        assert!(is_identifier_like("getUserData"));
        assert!(is_identifier_like("API_KEY"));
        assert!(is_identifier_like("DB"));
        assert!(!is_identifier_like("the"));
        assert!(!is_identifier_like("config"));
        assert!(!is_identifier_like("x"));
    }

    #[test]
    fn test_natural_language_strips_stop_words() {
        let processed = preprocess_natural_language("How does the config work?");
        assert!(!processed.to_lowercase().contains("how"));
        assert!(!processed.to_lowercase().contains("does"));
        assert!(processed.contains("config"));
    }

    #[test]
    fn test_natural_language_preserves_identifiers() {
        let processed = preprocess_natural_language("What does load_config do with HttpClient?");
        assert!(processed.contains("load_config"));
        assert!(processed.contains("HttpClient"));
        assert!(!processed.contains("What"));
    }

    #[test]
    fn test_code_query_splits_camel_case() {
        let processed = preprocess_code_query("getUserData()");
        assert!(processed.contains("getUserData"));
        assert!(processed.contains("get"));
        assert!(processed.contains("User"));
        assert!(processed.contains("Data"));
    }

    #[test]
    fn test_code_query_splits_snake_case() {
        let processed = preprocess_code_query("my_helper_function(x)");
        assert!(processed.contains("my_helper_function"));
        assert!(processed.contains("helper"));
        assert!(processed.contains("function"));
    }

    #[test]
    fn test_code_query_decomposes_api_calls() {
        let processed = preprocess_code_query("model.from_pretrained(name)");
        assert!(processed.contains("model from_pretrained"));
        assert!(processed.contains("from_pretrained"));
    }

    #[test]
    fn test_code_query_skips_keywords_and_dedupes() {
        let processed = preprocess_code_query("def alpha(): return alpha");
        assert!(!processed.split(' ').any(|t| t == "def"));
        assert!(!processed.split(' ').any(|t| t == "return"));
        assert_eq!(processed.matches("alpha").count(), 1);
    }

    #[test]
    fn test_code_query_caps_at_thirty_terms() {
        let code: String = (0..60).map(|i| format!("unique_term_number{i} ")).collect();
        let processed = preprocess_code_query(&code);
        assert!(processed.split(' ').count() <= 30 * 3);
        let direct_terms: Vec<&str> = processed.split(' ').collect();
        assert!(direct_terms.len() <= 90);
    }

    #[test]
    fn test_extract_entities() {
        let entities = extract_entities(
            "main",
            "def main():\n    config = load_config()\n    data = fetch_data()\n",
        );
        assert!(entities.contains(&"main".to_string()));
        assert!(entities.contains(&"load_config".to_string()));
        assert!(entities.contains(&"fetch_data".to_string()));
        assert!(!entities.contains(&"def".to_string()));
    }

    #[test]
    fn test_extract_entities_dedupes() {
        let entities = extract_entities("helper", "helper() helper() helper()");
        assert_eq!(
            entities.iter().filter(|e| *e == "helper").count(),
            1
        );
    }
}
