use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    New,
    SeenInSession,
    Persisted,
}

impl DedupVerdict {
    pub fn is_new(self) -> bool {
        matches!(self, DedupVerdict::New)
    }
}

/// Session layer of duplicate suppression. Keys are recorded as soon as they
/// are checked, so a second sighting within the same pass never reaches the
/// persisted check. Create one per discovery pass or per store.
#[derive(Debug)]
pub struct DedupIndex<K> {
    seen: HashSet<K>,
}

impl<K: Eq + Hash> Default for DedupIndex<K> {
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }
}

impl<K: Eq + Hash> DedupIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session set first; `persisted` runs only for keys new to this session.
    pub fn check<E, F>(&mut self, key: K, persisted: F) -> Result<DedupVerdict, E>
    where
        F: FnOnce(&K) -> Result<bool, E>,
    {
        if self.seen.contains(&key) {
            return Ok(DedupVerdict::SeenInSession);
        }
        let exists = persisted(&key)?;
        self.seen.insert(key);
        if exists {
            Ok(DedupVerdict::Persisted)
        } else {
            Ok(DedupVerdict::New)
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
