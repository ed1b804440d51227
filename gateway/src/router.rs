//! Category to backend routing.

use relay_common::{BackendId, Category};

use crate::classifier;
use crate::config::RoutingConfig;

/// Where a request goes and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub backend: BackendId,
    /// Classification result; `None` when an override skipped classification.
    pub category: Option<Category>,
    pub overridden: bool,
}

/// Complete Category → BackendId table, fixed at startup.
#[derive(Debug, Clone)]
pub struct RouteTable {
    table: [BackendId; 4],
}

impl RouteTable {
    /// Build the table. Categories without an entry go to the general backend.
    pub fn from_config(config: &RoutingConfig) -> Self {
        let mut table = [config.general; 4];
        for category in Category::PRECEDENCE {
            match config.get(category) {
                Some(backend) => table[slot(category)] = backend,
                None => tracing::warn!(
                    category = %category,
                    backend = %config.general,
                    "No route configured for category, using general backend"
                ),
            }
        }
        Self { table }
    }

    /// Backend serving a category.
    pub fn backend_for(&self, category: Category) -> BackendId {
        self.table[slot(category)]
    }

    /// Pick the backend for a request. A known override always wins.
    pub fn route(&self, text: &str, requested: Option<BackendId>) -> Route {
        if let Some(backend) = requested {
            return Route {
                backend,
                category: None,
                overridden: true,
            };
        }

        let category = classifier::classify(text);
        Route {
            backend: self.backend_for(category),
            category: Some(category),
            overridden: false,
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

fn slot(category: Category) -> usize {
    match category {
        Category::Code => 0,
        Category::Document => 1,
        Category::Media => 2,
        Category::General => 3,
    }
}

/// Parse a caller-supplied backend override.
///
/// `auto`, blank and unknown names mean "let the classifier decide".
pub fn parse_override(requested: Option<&str>) -> Option<BackendId> {
    let name = requested?.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("auto") {
        return None;
    }
    let backend = BackendId::parse(name);
    if backend.is_none() {
        tracing::debug!(requested = %name, "Unknown backend override, classifying instead");
    }
    backend
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_natural_mapping() {
        let table = RouteTable::default();
        assert_eq!(table.backend_for(Category::Code), BackendId::Coder);
        assert_eq!(table.backend_for(Category::Document), BackendId::Documents);
        assert_eq!(table.backend_for(Category::Media), BackendId::Multimodal);
        assert_eq!(table.backend_for(Category::General), BackendId::General);
    }

    #[test]
    fn test_missing_entries_use_general() {
        let config = RoutingConfig {
            code: Some(BackendId::Coder),
            document: None,
            media: None,
            general: BackendId::Documents,
        };
        let table = RouteTable::from_config(&config);
        assert_eq!(table.backend_for(Category::Code), BackendId::Coder);
        assert_eq!(table.backend_for(Category::Media), BackendId::Documents);
        assert_eq!(table.backend_for(Category::Document), BackendId::Documents);
    }

    #[test]
    fn test_route_classifies_without_override() {
        let table = RouteTable::default();
        let route = table.route("debug this function: def f(x): return x", None);
        assert_eq!(route.backend, BackendId::Coder);
        assert_eq!(route.category, Some(Category::Code));
        assert!(!route.overridden);
    }

    #[test]
    fn test_override_always_wins() {
        let table = RouteTable::default();
        for backend in BackendId::ALL {
            let route = table.route("def f(x): return x", Some(backend));
            assert_eq!(route.backend, backend);
            assert!(route.overridden);
            assert!(route.category.is_none());
        }
    }

    #[test]
    fn test_route_is_pure_and_in_table() {
        let table = RouteTable::default();
        for text in ["hello", "read my pdf", "photo please", "fn main() {}", ""] {
            let first = table.route(text, None);
            assert!(BackendId::ALL.contains(&first.backend));
            assert_eq!(table.route(text, None), first);
        }
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(parse_override(None), None);
        assert_eq!(parse_override(Some("auto")), None);
        assert_eq!(parse_override(Some("AUTO")), None);
        assert_eq!(parse_override(Some("  ")), None);
        assert_eq!(parse_override(Some("nonsense")), None);
        assert_eq!(parse_override(Some("coder")), Some(BackendId::Coder));
        assert_eq!(parse_override(Some("deepseek")), Some(BackendId::Coder));
        assert_eq!(parse_override(Some("gpt4all")), Some(BackendId::General));
    }
}
