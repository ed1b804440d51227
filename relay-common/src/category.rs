//! Content categories assigned by the classifier.

use serde::{Deserialize, Serialize};

/// What a request is about, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Code,
    Document,
    Media,
    General,
}

impl Category {
    /// All categories in tie-break precedence order (highest first).
    pub const PRECEDENCE: [Category; 4] = [
        Category::Code,
        Category::Document,
        Category::Media,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Code => "code",
            Category::Document => "document",
            Category::Media => "media",
            Category::General => "general",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&Category::Document).unwrap();
        assert_eq!(json, r#""document""#);
    }

    #[test]
    fn test_precedence_order() {
        assert_eq!(Category::PRECEDENCE[0], Category::Code);
        assert_eq!(Category::PRECEDENCE[3], Category::General);
    }
}
