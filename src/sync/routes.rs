//! # Resource Routes
//!
//! Static mapping from a mutation's resource path to the collections it
//! invalidates. `/usuarios/7` → `users`; `/professores/3` → `teachers`
//! and `users` (a teacher is also a user row).

use std::collections::BTreeMap;

use super::event::CollectionKey;

/// Resource segment → affected collections
#[derive(Debug, Clone)]
pub struct ResourceRoutes {
    routes: BTreeMap<String, Vec<CollectionKey>>,
}

impl Default for ResourceRoutes {
    fn default() -> Self {
        let mut routes = Self::empty();

        routes.insert("escolas", vec![CollectionKey::SCHOOLS]);
        routes.insert("usuarios", vec![CollectionKey::USERS]);
        routes.insert("gestores", vec![CollectionKey::USERS]);
        routes.insert("turmas", vec![CollectionKey::CLASSES]);
        routes.insert(
            "professores",
            vec![CollectionKey::TEACHERS, CollectionKey::USERS],
        );
        routes.insert(
            "alunos",
            vec![CollectionKey::STUDENTS, CollectionKey::USERS],
        );

        for key in CollectionKey::builtin() {
            routes.insert(key.as_str().to_string(), vec![key]);
        }

        routes
    }
}

impl ResourceRoutes {
    /// Table with no routes at all
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Add or replace the route for one resource segment
    pub fn insert(&mut self, resource: impl Into<String>, collections: Vec<CollectionKey>) {
        self.routes.insert(resource.into(), collections);
    }

    /// Collections affected by a mutation on `path`
    ///
    /// The resource is the first path segment, after an optional `api`
    /// prefix. Query strings are ignored. Unknown resources affect nothing.
    pub fn collections_for(&self, path: &str) -> Vec<CollectionKey> {
        match Self::resource_of(path) {
            Some(resource) => self.routes.get(resource).cloned().unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Every (resource, collections) pair, sorted by resource
    pub fn entries(&self) -> Vec<(&str, &[CollectionKey])> {
        self.routes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn resource_of(path: &str) -> Option<&str> {
        let path = path.split(['?', '#']).next().unwrap_or("");
        let mut segments = path.split('/').filter(|s| !s.is_empty());

        match segments.next()? {
            "api" => segments.next(),
            first => Some(first),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_routes() {
        let routes = ResourceRoutes::default();
        assert_eq!(routes.collections_for("/usuarios/7"), vec![CollectionKey::USERS]);
        assert_eq!(routes.collections_for("/api/turmas"), vec![CollectionKey::CLASSES]);
        assert_eq!(
            routes.collections_for("/api/escolas/gestor"),
            vec![CollectionKey::SCHOOLS]
        );
    }

    #[test]
    fn test_multi_collection_route() {
        let routes = ResourceRoutes::default();
        assert_eq!(
            routes.collections_for("/professores/3"),
            vec![CollectionKey::TEACHERS, CollectionKey::USERS]
        );
    }

    #[test]
    fn test_query_string_ignored() {
        let routes = ResourceRoutes::default();
        assert_eq!(
            routes.collections_for("/alunos/12?force=true"),
            vec![CollectionKey::STUDENTS, CollectionKey::USERS]
        );
    }

    #[test]
    fn test_unknown_resource() {
        let routes = ResourceRoutes::default();
        assert!(routes.collections_for("/relatorios/1").is_empty());
        assert!(routes.collections_for("/").is_empty());
        assert!(routes.collections_for("").is_empty());
    }

    #[test]
    fn test_override() {
        let mut routes = ResourceRoutes::default();
        routes.insert("usuarios", vec![CollectionKey::USERS, CollectionKey::new("audit")]);
        assert_eq!(
            routes.collections_for("/usuarios/1"),
            vec![CollectionKey::USERS, CollectionKey::new("audit")]
        );
    }

    #[test]
    fn test_entries_sorted() {
        let routes = ResourceRoutes::default();
        let entries = routes.entries();
        let names: Vec<&str> = entries.iter().map(|(k, _)| *k).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
