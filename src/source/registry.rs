//! Name → adapter table built from configuration.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::rate_limiter::RateLimiter;

use super::{
    GoogleBooksAdapter, HarvardAdapter, LocAdapter, OpenLibraryAdapter, ScraperAdapter,
    SourceAdapter, SourceSettings, Z3950Adapter,
};

/// Registry of constructed source adapters, looked up by case-insensitive name.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter. The first adapter registered under a name keeps it.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        if self
            .adapters
            .iter()
            .any(|existing| existing.name().eq_ignore_ascii_case(adapter.name()))
        {
            warn!(
                source = %adapter.name(),
                kind = %adapter.policy().kind,
                "duplicate source name, keeping the earlier adapter"
            );
        } else {
            debug!(source = %adapter.name(), kind = %adapter.policy().kind, "registered source");
            self.adapters.push(adapter);
        }
    }

    /// Returns the adapter named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.name().eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Returns registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|adapter| adapter.name().to_string())
            .collect()
    }

    /// Returns the number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns whether no adapter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Resolves `names` into adapters, keeping the given order.
    ///
    /// Unknown names are logged and skipped; repeated names are kept once.
    #[must_use]
    pub fn select(&self, names: &[String]) -> Vec<Arc<dyn SourceAdapter>> {
        let mut selected: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(names.len());
        for name in names {
            let Some(adapter) = self.get(name) else {
                warn!(source = %name, "unknown source name, skipping");
                continue;
            };
            if selected
                .iter()
                .any(|chosen| chosen.name().eq_ignore_ascii_case(adapter.name()))
            {
                continue;
            }
            selected.push(adapter);
        }
        selected
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}

/// Orders `(name, priority)` pairs by ascending priority, keeping input order for ties.
#[must_use]
pub fn order_by_priority(mut entries: Vec<(String, i64)>) -> Vec<String> {
    entries.sort_by_key(|(_, priority)| *priority);
    entries.into_iter().map(|(name, _)| name).collect()
}

fn shared<A: SourceAdapter + 'static>(adapter: A) -> Arc<dyn SourceAdapter> {
    Arc::new(adapter)
}

/// Constructs every known adapter from `settings`.
///
/// An adapter that fails construction is logged and left out; the run can
/// still use the others.
#[must_use]
pub fn build_source_registry(
    settings: &SourceSettings,
    limiter: &Arc<RateLimiter>,
) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    let mut add = |built: Result<Arc<dyn SourceAdapter>, super::SourceError>| match built {
        Ok(adapter) => registry.register(adapter),
        Err(error) => warn!(source = %error.source_name(), error = %error, "source unavailable"),
    };

    add(HarvardAdapter::new(settings, Arc::clone(limiter)).map(shared));
    add(LocAdapter::new(settings, Arc::clone(limiter)).map(shared));
    add(OpenLibraryAdapter::new(settings, Arc::clone(limiter)).map(shared));
    add(GoogleBooksAdapter::new(settings, Arc::clone(limiter)).map(shared));

    for (name, target) in &settings.z3950_targets {
        add(
            Z3950Adapter::new(name, target, settings, Arc::clone(limiter))
                .map(shared),
        );
    }
    for (name, template) in &settings.scraping_catalogs {
        add(
            ScraperAdapter::new(name, template.clone(), settings, Arc::clone(limiter))
                .map(shared),
        );
    }

    registry
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::ScrapingTemplate;
    use std::collections::BTreeMap;

    fn registry() -> SourceRegistry {
        let mut settings = SourceSettings {
            z3950_targets: BTreeMap::from([
                ("Yale".to_string(), "z3950.library.yale.edu:7090/voyager".to_string()),
                ("Broken".to_string(), "  ".to_string()),
                ("harvard".to_string(), "hollis.harvard.edu:210/hollis".to_string()),
            ]),
            ..SourceSettings::default()
        };
        settings.scraping_catalogs.insert(
            "Stanford".to_string(),
            ScrapingTemplate {
                seed_url_template: "https://searchworks.stanford.edu/?q={number}".to_string(),
                record_base_url: "https://searchworks.stanford.edu/view".to_string(),
            },
        );
        settings.scraping_catalogs.insert(
            "NoPlaceholder".to_string(),
            ScrapingTemplate {
                seed_url_template: "https://example.org/search".to_string(),
                record_base_url: "https://example.org".to_string(),
            },
        );
        build_source_registry(&settings, &Arc::new(RateLimiter::disabled()))
    }

    #[test]
    fn test_build_registers_all_valid_sources() {
        let registry = registry();
        let names = registry.names();
        for expected in ["Harvard", "LOC", "OpenLibrary", "Google", "Yale", "Stanford"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(registry.get("Broken").is_none());
        assert!(registry.get("NoPlaceholder").is_none());
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn test_duplicate_name_keeps_builtin_api_adapter() {
        let registry = registry();
        let harvard = registry.get("Harvard").unwrap();
        assert_eq!(harvard.policy().kind, crate::source::SourceKind::Api);
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.get("openlibrary").unwrap().name(), "OpenLibrary");
        assert_eq!(registry.get(" loc ").unwrap().name(), "LOC");
    }

    #[test]
    fn test_select_keeps_order_and_skips_unknown_and_repeats() {
        let registry = registry();
        let selected = registry.select(&[
            "Yale".to_string(),
            "Nowhere".to_string(),
            "LOC".to_string(),
            "yale".to_string(),
        ]);
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["Yale", "LOC"]);
    }

    #[test]
    fn test_order_by_priority_is_stable() {
        let ordered = order_by_priority(vec![
            ("OpenLibrary".to_string(), 3),
            ("LOC".to_string(), 1),
            ("Harvard".to_string(), 1),
        ]);
        assert_eq!(ordered, vec!["LOC", "Harvard", "OpenLibrary"]);
    }
}
