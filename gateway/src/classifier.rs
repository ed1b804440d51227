//! Content classification of request text.
//!
//! Structural code markers win outright; otherwise the text is scored
//! against four disjoint keyword sets.

use once_cell::sync::Lazy;
use regex::Regex;
use relay_common::Category;

// ---------------------------------------------------------------------------
// Structural markers
// ---------------------------------------------------------------------------

/// Language constructs that make a text code regardless of its wording.
static CODE_CONSTRUCTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_patterns(&[
        r"\bdef\s+\w+\s*\(",
        r"\bclass\s+\w+\s*[:({]",
        r"\bfunction\s*\w*\s*\(",
        r"\bfn\s+\w+\s*\(",
        r"(?m)^\s*(import\s+[\w.]+|from\s+[\w.]+\s+import\b|#include\s*<)",
        r"\b(const|let|var)\s+\w+\s*=",
        r"\b(public|private)\s+static\b",
        r"=>",
        r"console\.log\(",
        r"\bprint\(",
    ])
});

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("Bad regex pattern `{p}`: {e}")))
        .collect()
}

fn has_code_structure(text: &str) -> bool {
    text.contains("```") || CODE_CONSTRUCTS.iter().any(|re| re.is_match(text))
}

// ---------------------------------------------------------------------------
// Keyword sets
// ---------------------------------------------------------------------------

const CODE_KEYWORDS: &[&str] = &[
    "code", "coding", "function", "class", "programming", "program", "debug", "error", "bug",
    "python", "javascript", "typescript", "java", "c++", "c#", "rust", "golang", "php", "html",
    "css", "sql", "algorithm", "api", "backend", "frontend", "syntax", "compile", "execute",
    "script", "package", "import", "export", "variable", "loop", "conditional", "refactor",
    "implementation", "developer", "stack trace", "optimize code", "write code", "fix code",
    "review code",
];

const DOCUMENT_KEYWORDS: &[&str] = &[
    "file", "files", "document", "documents", "pdf", "upload", "csv", "json", "xml", "yaml",
    "spreadsheet", "docx", "large file", "document analysis", "extract text", "read pdf",
    "summarize this document",
];

const MEDIA_KEYWORDS: &[&str] = &[
    "image", "images", "photo", "photos", "picture", "pictures", "jpeg", "jpg", "png", "gif",
    "vision", "video", "videos", "mp4", "avi", "screenshot", "analyze image", "analyze video",
    "video processing",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "hello", "hi", "hey", "thanks", "joke", "weather", "story", "poem", "recipe", "advice",
    "chat", "talk", "how are you", "good morning", "good night", "tell me about",
];

fn keywords(category: Category) -> &'static [&'static str] {
    match category {
        Category::Code => CODE_KEYWORDS,
        Category::Document => DOCUMENT_KEYWORDS,
        Category::Media => MEDIA_KEYWORDS,
        Category::General => GENERAL_KEYWORDS,
    }
}

/// Lowercased text split into tokens. `+` and `#` stay inside tokens so
/// `c++` and `c#` survive.
fn tokenize(lowered: &str) -> Vec<&str> {
    lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#' || c == '_'))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Number of distinct keywords of a set present in the text.
fn score(keywords: &[&str], lowered: &str, tokens: &[&str]) -> usize {
    keywords
        .iter()
        .filter(|keyword| {
            let keyword: &str = keyword;
            if keyword.contains(' ') {
                lowered.contains(keyword)
            } else {
                tokens.contains(&keyword)
            }
        })
        .count()
}

/// Classify request text into a content category. Total: every input,
/// including the empty string, maps to exactly one category.
pub fn classify(text: &str) -> Category {
    if has_code_structure(text) {
        return Category::Code;
    }

    let lowered = text.to_lowercase();
    let tokens = tokenize(&lowered);

    let mut best = Category::General;
    let mut best_score = 0;
    // PRECEDENCE is highest first, so only a strictly greater score displaces
    for category in Category::PRECEDENCE {
        let score = score(keywords(category), &lowered, &tokens);
        if score > best_score {
            best = category;
            best_score = score;
        }
    }
    best
}
