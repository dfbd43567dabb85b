//! Read-through / write-through competition cache
//!
//! Holds the last value written or read for each competition. The store
//! stays authoritative: a miss always falls back to it and nothing here
//! survives a restart.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::Competition;

#[derive(Default)]
pub struct CompetitionCache {
    entries: RwLock<HashMap<Uuid, Competition>>,
}

impl CompetitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<Competition> {
        self.entries.read().get(id).cloned()
    }

    pub fn put(&self, competition: &Competition) {
        self.entries
            .write()
            .insert(competition.id, competition.clone());
    }

    pub fn remove(&self, id: &Uuid) {
        self.entries.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::competition;

    #[test]
    fn test_write_back_replaces() {
        let cache = CompetitionCache::new();
        let mut c = competition("cache", 1);
        cache.put(&c);
        c.participant_count = 7;
        cache.put(&c);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&c.id).unwrap().participant_count, 7);
        cache.remove(&c.id);
        assert!(cache.is_empty());
    }
}
