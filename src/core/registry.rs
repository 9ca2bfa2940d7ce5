//! Session registry
//!
//! Maps display surfaces, and optional user tags, to live sessions. The
//! registry is an ordinary value owned by whoever manages the sessions;
//! a mutex serializes all access so lookups may come from any thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::lock;
use super::session::{Session, SurfaceId};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Entries<T> {
    by_surface: HashMap<SurfaceId, Arc<T>>,
    /// Surfaces registered under each tag, oldest first
    by_tag: HashMap<String, Vec<SurfaceId>>,
}

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self {
            by_surface: HashMap::new(),
            by_tag: HashMap::new(),
        }
    }
}

/// Surface and tag lookup for live sessions
#[derive(Debug)]
pub struct Registry<T = Session> {
    entries: Mutex<Entries<T>>,
}

/// The registry of terminal sessions
pub type SessionRegistry = Registry<Session>;

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Add `item` for `surface`. Re-registering a surface replaces the old
    /// entry, which is returned.
    pub fn register(&self, surface: SurfaceId, tag: Option<&str>, item: Arc<T>) -> Option<Arc<T>> {
        let mut entries = lock(&self.entries);
        let previous = entries.by_surface.insert(surface, item);
        if previous.is_some() {
            Self::forget_tags(&mut entries, surface);
        }
        if let Some(tag) = tag {
            entries.by_tag.entry(tag.to_string()).or_default().push(surface);
        }
        tracing::debug!(surface, tag, "registered");
        previous
    }

    pub fn find_by_surface(&self, surface: SurfaceId) -> Option<Arc<T>> {
        lock(&self.entries).by_surface.get(&surface).cloned()
    }

    /// The most recently registered entry carrying `tag`
    pub fn find_by_tag(&self, tag: &str) -> Option<Arc<T>> {
        let entries = lock(&self.entries);
        let surface = entries.by_tag.get(tag)?.last()?;
        entries.by_surface.get(surface).cloned()
    }

    /// Like [`find_by_surface`](Self::find_by_surface), but a miss is an error
    pub fn get(&self, surface: SurfaceId) -> Result<Arc<T>> {
        self.find_by_surface(surface)
            .ok_or_else(|| Error::RegistryMiss(format!("surface {}", surface)))
    }

    /// Like [`find_by_tag`](Self::find_by_tag), but a miss is an error
    pub fn get_by_tag(&self, tag: &str) -> Result<Arc<T>> {
        self.find_by_tag(tag)
            .ok_or_else(|| Error::RegistryMiss(format!("tag {}", tag)))
    }

    /// Remove the entry for `surface` and every tag pointing at it
    pub fn unregister(&self, surface: SurfaceId) -> Option<Arc<T>> {
        let mut entries = lock(&self.entries);
        let removed = entries.by_surface.remove(&surface);
        if removed.is_some() {
            Self::forget_tags(&mut entries, surface);
            tracing::debug!(surface, "unregistered");
        }
        removed
    }

    pub fn surfaces(&self) -> Vec<SurfaceId> {
        let mut surfaces: Vec<SurfaceId> = lock(&self.entries).by_surface.keys().copied().collect();
        surfaces.sort_unstable();
        surfaces
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).by_surface.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut entries = lock(&self.entries);
        entries.by_tag.clear();
        entries.by_surface.drain().map(|(_, item)| item).collect()
    }

    fn forget_tags(entries: &mut Entries<T>, surface: SurfaceId) {
        entries.by_tag.retain(|_, surfaces| {
            surfaces.retain(|s| *s != surface);
            !surfaces.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry<&'static str> {
        Registry::new()
    }

    #[test]
    fn test_register_and_find() {
        let reg = registry();
        reg.register(1, None, Arc::new("one"));
        assert_eq!(reg.find_by_surface(1).as_deref(), Some(&"one"));
        assert!(reg.find_by_surface(2).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_tag_last_registered_wins() {
        let reg = registry();
        reg.register(1, Some("build"), Arc::new("first"));
        reg.register(2, Some("build"), Arc::new("second"));
        assert_eq!(reg.find_by_tag("build").as_deref(), Some(&"second"));

        // Dropping the newest falls back to the older one
        reg.unregister(2);
        assert_eq!(reg.find_by_tag("build").as_deref(), Some(&"first"));

        reg.unregister(1);
        assert!(reg.find_by_tag("build").is_none());
    }

    #[test]
    fn test_reregister_surface_replaces() {
        let reg = registry();
        reg.register(1, Some("old"), Arc::new("a"));
        let previous = reg.register(1, Some("new"), Arc::new("b"));
        assert_eq!(previous.as_deref(), Some(&"a"));
        assert!(reg.find_by_tag("old").is_none());
        assert_eq!(reg.find_by_tag("new").as_deref(), Some(&"b"));
    }

    #[test]
    fn test_miss_is_registry_error() {
        let reg = registry();
        assert!(matches!(reg.get(7), Err(Error::RegistryMiss(_))));
        assert!(matches!(reg.get_by_tag("none"), Err(Error::RegistryMiss(_))));
    }

    #[test]
    fn test_independent_registries() {
        let a = registry();
        let b = registry();
        a.register(1, None, Arc::new("a"));
        assert!(b.find_by_surface(1).is_none());
    }

    #[test]
    fn test_drain() {
        let reg = registry();
        reg.register(2, Some("t"), Arc::new("x"));
        reg.register(1, None, Arc::new("y"));
        assert_eq!(reg.surfaces(), vec![1, 2]);
        assert_eq!(reg.drain().len(), 2);
        assert!(reg.is_empty());
        assert!(reg.find_by_tag("t").is_none());
    }
}
