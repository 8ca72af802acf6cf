//! Capability catalog: one namespace over local and provider tools.
//!
//! Provides:
//! - Name → origin resolution (with suggestions on a miss)
//! - Collision detection across origins
//! - Atomic whole-provider replace/remove
//! - Serialization of tools into OpenAI function-calling format

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::errors::CatalogError;
use super::local::LocalHandler;
use super::types::{ToolDescriptor, ToolOrigin, ToolSummary};

// ─── Entries ─────────────────────────────────────────────────────────────────

struct CatalogEntry {
    descriptor: Arc<ToolDescriptor>,
    handler: Option<LocalHandler>,
}

/// How a resolved tool is reached.
#[derive(Clone)]
pub enum ToolRoute {
    /// Call this handler in-process.
    Local(LocalHandler),
    /// Forward to the named provider.
    Provider(String),
}

impl std::fmt::Debug for ToolRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Local(..)"),
            Self::Provider(name) => f.debug_tuple("Provider").field(name).finish(),
        }
    }
}

/// Result of a successful `resolve`.
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub descriptor: Arc<ToolDescriptor>,
    pub route: ToolRoute,
}

impl ResolvedTool {
    /// The owning origin.
    pub fn origin(&self) -> &ToolOrigin {
        &self.descriptor.origin
    }
}

/// Outcome of registering a single local tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The name was free.
    Inserted,
    /// The same origin re-registered the name.
    Refreshed,
}

/// Outcome of a provider announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRegistration {
    /// Names new to the catalog.
    pub added: Vec<String>,
    /// Names the provider already owned.
    pub refreshed: Vec<String>,
    /// Names the provider owned before but no longer advertises.
    pub removed: Vec<String>,
}

// ─── CapabilityCatalog ───────────────────────────────────────────────────────

/// Unified tool namespace.
///
/// Every mutation runs under one write lock, so a concurrent `resolve`
/// observes either the full state before a mutation or the full state after.
#[derive(Default)]
pub struct CapabilityCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl CapabilityCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-process tool.
    pub fn register_local(
        &self,
        descriptor: ToolDescriptor,
        handler: LocalHandler,
    ) -> Result<Registration, CatalogError> {
        if !descriptor.origin.is_local() {
            return Err(CatalogError::OriginMismatch {
                name: descriptor.name.clone(),
                declared: descriptor.origin.clone(),
                attempted: ToolOrigin::Local,
            });
        }

        let mut entries = self.entries.write();
        let registration = match entries.get(&descriptor.name) {
            Some(existing) if !existing.descriptor.origin.is_local() => {
                return Err(CatalogError::NameCollision {
                    name: descriptor.name.clone(),
                    existing: existing.descriptor.origin.clone(),
                    attempted: ToolOrigin::Local,
                });
            }
            Some(_) => Registration::Refreshed,
            None => Registration::Inserted,
        };

        tracing::debug!(tool = %descriptor.name, ?registration, "registered local tool");
        entries.insert(
            descriptor.name.clone(),
            CatalogEntry {
                descriptor: Arc::new(descriptor),
                handler: Some(handler),
            },
        );
        Ok(registration)
    }

    /// Remove one local tool. Returns whether it existed.
    pub fn unregister_local(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.get(name) {
            Some(entry) if entry.descriptor.origin.is_local() => {
                entries.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Replace the full tool set owned by `provider`.
    ///
    /// All-or-nothing: if any name collides with a different origin, nothing
    /// changes. Names the provider previously owned but omits now are dropped.
    /// An empty announcement is equivalent to [`Self::unregister_all`].
    pub fn register_from_provider(
        &self,
        provider: &str,
        descriptors: Vec<ToolDescriptor>,
    ) -> Result<ProviderRegistration, CatalogError> {
        let origin = ToolOrigin::provider(provider);

        let mut seen = HashSet::new();
        for d in &descriptors {
            if d.origin != origin {
                return Err(CatalogError::OriginMismatch {
                    name: d.name.clone(),
                    declared: d.origin.clone(),
                    attempted: origin.clone(),
                });
            }
            if !seen.insert(d.name.as_str()) {
                return Err(CatalogError::DuplicateInAnnouncement {
                    provider: provider.to_string(),
                    name: d.name.clone(),
                });
            }
        }

        let mut entries = self.entries.write();

        for d in &descriptors {
            if let Some(existing) = entries.get(&d.name) {
                if existing.descriptor.origin != origin {
                    return Err(CatalogError::NameCollision {
                        name: d.name.clone(),
                        existing: existing.descriptor.origin.clone(),
                        attempted: origin,
                    });
                }
            }
        }

        let mut outcome = ProviderRegistration::default();
        let previous: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.descriptor.origin == origin)
            .map(|(name, _)| name.clone())
            .collect();

        for name in previous {
            if !seen.contains(name.as_str()) {
                entries.remove(&name);
                outcome.removed.push(name);
            } else {
                outcome.refreshed.push(name);
            }
        }

        for d in descriptors {
            if !outcome.refreshed.contains(&d.name) {
                outcome.added.push(d.name.clone());
            }
            entries.insert(
                d.name.clone(),
                CatalogEntry {
                    descriptor: Arc::new(d),
                    handler: None,
                },
            );
        }

        outcome.added.sort();
        outcome.refreshed.sort();
        outcome.removed.sort();

        tracing::info!(
            provider,
            added = outcome.added.len(),
            refreshed = outcome.refreshed.len(),
            removed = outcome.removed.len(),
            "registered provider tools"
        );
        Ok(outcome)
    }

    /// Remove every tool owned by `provider`. Returns how many were removed.
    pub fn unregister_all(&self, provider: &str) -> usize {
        let origin = ToolOrigin::provider(provider);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.descriptor.origin != origin);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(provider, removed, "unregistered provider tools");
        }
        removed
    }

    /// Resolve a tool name to its origin and route.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTool, CatalogError> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(entry) => {
                let route = match (&entry.handler, &entry.descriptor.origin) {
                    (Some(handler), _) => ToolRoute::Local(Arc::clone(handler)),
                    (None, ToolOrigin::Provider(provider)) => ToolRoute::Provider(provider.clone()),
                    (None, ToolOrigin::Local) => {
                        // Unreachable through the public API: local entries
                        // always carry a handler.
                        return Err(CatalogError::UnknownTool {
                            name: name.to_string(),
                            suggestions: Vec::new(),
                        });
                    }
                };
                Ok(ResolvedTool {
                    descriptor: Arc::clone(&entry.descriptor),
                    route,
                })
            }
            None => Err(CatalogError::UnknownTool {
                name: name.to_string(),
                suggestions: find_similar(entries.keys(), name, 3),
            }),
        }
    }

    /// The origin owning `name`, if any.
    pub fn origin_of(&self, name: &str) -> Option<ToolOrigin> {
        self.entries
            .read()
            .get(name)
            .map(|e| e.descriptor.origin.clone())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Names owned by `provider`, sorted.
    pub fn tools_for_provider(&self, provider: &str) -> Vec<String> {
        let origin = ToolOrigin::provider(provider);
        let mut names: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.descriptor.origin == origin)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stable, name-sorted snapshot of every tool.
    pub fn list(&self) -> Vec<ToolSummary> {
        let mut rows: Vec<ToolSummary> = self
            .entries
            .read()
            .values()
            .map(|e| ToolSummary::from(e.descriptor.as_ref()))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Serialize all tools into OpenAI function-calling format, sorted by name.
    ///
    /// Used to populate the `tools` field in chat completion requests.
    pub fn to_openai_tools(&self) -> Vec<serde_json::Value> {
        self.list()
            .into_iter()
            .map(|row| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": row.name,
                        "description": row.description,
                        "parameters": row.schema,
                    }
                })
            })
            .collect()
    }
}

// ─── Suggestions ─────────────────────────────────────────────────────────────

/// Up to `max_results` names most similar to `query`, best first.
fn find_similar<'a>(
    names: impl Iterator<Item = &'a String>,
    query: &str,
    max_results: usize,
) -> Vec<String> {
    let mut scored: Vec<(String, f64)> = names
        .map(|name| (name.clone(), similarity(query, name)))
        .filter(|(_, score)| *score > 0.3)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(max_results);
    scored.into_iter().map(|(name, _)| name).collect()
}

/// Levenshtein edit distance over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Normalized similarity (0.0 = nothing in common, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::local::local_sync_fn;
    use crate::catalog::types::{InputSchema, ParamKind};
    use serde_json::json;

    fn remote(provider: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor::remote(provider, name, &format!("{name} tool"), InputSchema::empty())
    }

    fn local(name: &str) -> ToolDescriptor {
        ToolDescriptor::local(name, "local tool", InputSchema::empty())
    }

    fn noop() -> LocalHandler {
        local_sync_fn(|_| Ok(json!(null)))
    }

    #[test]
    fn test_resolve_is_total() {
        let catalog = CapabilityCatalog::new();
        catalog.register_local(local("echo"), noop()).unwrap();
        catalog
            .register_from_provider("web", vec![remote("web", "search")])
            .unwrap();

        assert!(catalog.resolve("echo").unwrap().origin().is_local());
        assert_eq!(
            catalog.resolve("search").unwrap().origin(),
            &ToolOrigin::provider("web")
        );
        assert!(matches!(
            catalog.resolve("missing"),
            Err(CatalogError::UnknownTool { .. })
        ));
    }

    #[test]
    fn test_resolve_routes() {
        let catalog = CapabilityCatalog::new();
        catalog.register_local(local("echo"), noop()).unwrap();
        catalog
            .register_from_provider("web", vec![remote("web", "search")])
            .unwrap();

        assert!(matches!(catalog.resolve("echo").unwrap().route, ToolRoute::Local(_)));
        match catalog.resolve("search").unwrap().route {
            ToolRoute::Provider(p) => assert_eq!(p, "web"),
            other => panic!("expected provider route, got {other:?}"),
        }
    }

    #[test]
    fn test_two_providers_same_name_collide() {
        let catalog = CapabilityCatalog::new();
        catalog
            .register_from_provider("alpha", vec![remote("alpha", "search")])
            .unwrap();

        let err = catalog
            .register_from_provider("beta", vec![remote("beta", "search"), remote("beta", "fetch")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::NameCollision { .. }));

        // All-or-nothing: beta's non-colliding tool was not added either.
        assert!(!catalog.contains("fetch"));
        assert_eq!(catalog.origin_of("search"), Some(ToolOrigin::provider("alpha")));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_local_vs_provider_collision() {
        let catalog = CapabilityCatalog::new();
        catalog.register_local(local("search"), noop()).unwrap();
        let err = catalog
            .register_from_provider("web", vec![remote("web", "search")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::NameCollision { .. }));

        let catalog = CapabilityCatalog::new();
        catalog
            .register_from_provider("web", vec![remote("web", "search")])
            .unwrap();
        let err = catalog.register_local(local("search"), noop()).unwrap_err();
        assert!(matches!(err, CatalogError::NameCollision { .. }));
    }

    #[test]
    fn test_same_origin_reregistration_is_refresh() {
        let catalog = CapabilityCatalog::new();
        assert_eq!(
            catalog.register_local(local("echo"), noop()).unwrap(),
            Registration::Inserted
        );
        assert_eq!(
            catalog.register_local(local("echo"), noop()).unwrap(),
            Registration::Refreshed
        );

        catalog
            .register_from_provider("web", vec![remote("web", "search"), remote("web", "fetch")])
            .unwrap();
        let outcome = catalog
            .register_from_provider("web", vec![remote("web", "search"), remote("web", "crawl")])
            .unwrap();
        assert_eq!(outcome.added, vec!["crawl"]);
        assert_eq!(outcome.refreshed, vec!["search"]);
        assert_eq!(outcome.removed, vec!["fetch"]);
        assert_eq!(catalog.tools_for_provider("web"), vec!["crawl", "search"]);
    }

    #[test]
    fn test_duplicate_name_in_one_announcement() {
        let catalog = CapabilityCatalog::new();
        let err = catalog
            .register_from_provider("web", vec![remote("web", "search"), remote("web", "search")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateInAnnouncement { .. }));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_origin_mismatch_rejected() {
        let catalog = CapabilityCatalog::new();
        let err = catalog
            .register_from_provider("web", vec![remote("other", "search")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::OriginMismatch { .. }));

        let err = catalog
            .register_local(remote("web", "search"), noop())
            .unwrap_err();
        assert!(matches!(err, CatalogError::OriginMismatch { .. }));
    }

    #[test]
    fn test_unregister_all_removes_exactly_one_provider() {
        let catalog = CapabilityCatalog::new();
        catalog.register_local(local("echo"), noop()).unwrap();
        catalog
            .register_from_provider("a", vec![remote("a", "one"), remote("a", "two")])
            .unwrap();
        catalog
            .register_from_provider("b", vec![remote("b", "three")])
            .unwrap();

        assert_eq!(catalog.unregister_all("a"), 2);
        let names: Vec<String> = catalog.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "three"]);
        assert_eq!(catalog.unregister_all("a"), 0);
    }

    #[test]
    fn test_unregister_local_ignores_provider_tools() {
        let catalog = CapabilityCatalog::new();
        catalog
            .register_from_provider("web", vec![remote("web", "search")])
            .unwrap();
        assert!(!catalog.unregister_local("search"));
        catalog.register_local(local("echo"), noop()).unwrap();
        assert!(catalog.unregister_local("echo"));
        assert!(!catalog.contains("echo"));
    }

    #[test]
    fn test_unknown_tool_suggestions() {
        let catalog = CapabilityCatalog::new();
        catalog
            .register_from_provider(
                "fs",
                vec![remote("fs", "read_file"), remote("fs", "write_file"), remote("fs", "zip")],
            )
            .unwrap();
        match catalog.resolve("read_fil") {
            Err(CatalogError::UnknownTool { suggestions, .. }) => {
                assert_eq!(suggestions.first().map(String::as_str), Some("read_file"));
                assert!(!suggestions.contains(&"zip".to_string()));
            }
            other => panic!("expected UnknownTool, got {other:?}"),
        }
    }

    #[test]
    fn test_list_is_sorted_snapshot() {
        let catalog = CapabilityCatalog::new();
        catalog
            .register_from_provider("p", vec![remote("p", "zeta"), remote("p", "alpha")])
            .unwrap();
        catalog.register_local(local("mid"), noop()).unwrap();
        let names: Vec<String> = catalog.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_to_openai_tools() {
        let catalog = CapabilityCatalog::new();
        let schema = InputSchema::builder()
            .required("a", ParamKind::Integer, "")
            .build();
        catalog
            .register_local(ToolDescriptor::local("add", "Add numbers", schema), noop())
            .unwrap();
        let tools = catalog.to_openai_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "add");
        assert_eq!(tools[0]["function"]["parameters"]["required"], json!(["a"]));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_similarity_range() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 1.0);
        let s = similarity("search", "fetch");
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn test_concurrent_unregister_never_tears() {
        let catalog = Arc::new(CapabilityCatalog::new());
        let tools: Vec<ToolDescriptor> = (0..50).map(|i| remote("p", &format!("t{i}"))).collect();
        catalog.register_from_provider("p", tools.clone()).unwrap();

        let reader = {
            let catalog = Arc::clone(&catalog);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let owned = catalog.tools_for_provider("p").len();
                    assert!(owned == 0 || owned == 50, "observed partial state: {owned}");
                }
            })
        };

        for _ in 0..100 {
            catalog.unregister_all("p");
            catalog.register_from_provider("p", tools.clone()).unwrap();
        }
        reader.join().unwrap();
    }
}
