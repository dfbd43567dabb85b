//! In-process store, used when no database path is configured and in tests

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    already_registered, apply_filter, competition_full, competition_not_found, invalid_transition,
    merge_editable, participation_changed, participation_not_found, same_version, shift_count,
    CompetitionStore,
};
use crate::error::Result;
use crate::models::{Competition, CompetitionFilter, CompetitionStatus, Participation};

#[derive(Default)]
struct Tables {
    competitions: HashMap<Uuid, Competition>,
    participations: HashMap<Uuid, Participation>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompetitionStore for MemoryStore {
    async fn insert_competition(&self, competition: &Competition) -> Result<()> {
        self.tables
            .lock()
            .competitions
            .insert(competition.id, competition.clone());
        Ok(())
    }

    async fn find_competition(&self, id: Uuid) -> Result<Option<Competition>> {
        Ok(self.tables.lock().competitions.get(&id).cloned())
    }

    async fn list_competitions(&self, filter: &CompetitionFilter) -> Result<Vec<Competition>> {
        let all = self.tables.lock().competitions.values().cloned().collect();
        Ok(apply_filter(all, filter))
    }

    async fn update_competition(&self, competition: &Competition) -> Result<Competition> {
        let mut tables = self.tables.lock();
        let stored = tables
            .competitions
            .get_mut(&competition.id)
            .ok_or_else(|| competition_not_found(competition.id))?;
        merge_editable(stored, competition);
        Ok(stored.clone())
    }

    async fn delete_competition(&self, id: Uuid) -> Result<()> {
        self.tables
            .lock()
            .competitions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| competition_not_found(id))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: CompetitionStatus,
        to: CompetitionStatus,
        at: DateTime<Utc>,
    ) -> Result<Competition> {
        let mut tables = self.tables.lock();
        let stored = tables
            .competitions
            .get_mut(&id)
            .ok_or_else(|| competition_not_found(id))?;
        if stored.status != from {
            return Err(invalid_transition(stored.status, to));
        }
        stored.status = to;
        stored.updated_at = at;
        Ok(stored.clone())
    }

    async fn insert_participation(&self, participation: &Participation) -> Result<Competition> {
        let mut tables = self.tables.lock();
        let duplicate = tables.participations.values().any(|p| {
            p.competition_id == participation.competition_id && p.user_id == participation.user_id
        });
        if duplicate {
            return Err(already_registered());
        }

        let competition = tables
            .competitions
            .get_mut(&participation.competition_id)
            .ok_or_else(|| competition_not_found(participation.competition_id))?;
        if competition.is_full() {
            return Err(competition_full());
        }
        competition.participant_count += 1;
        let updated = competition.clone();

        tables
            .participations
            .insert(participation.id, participation.clone());
        Ok(updated)
    }

    async fn find_participation(
        &self,
        competition_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Participation>> {
        Ok(self
            .tables
            .lock()
            .participations
            .values()
            .find(|p| p.competition_id == competition_id && p.user_id == user_id)
            .cloned())
    }

    async fn list_participations(&self, competition_id: Uuid) -> Result<Vec<Participation>> {
        let mut list: Vec<Participation> = self
            .tables
            .lock()
            .participations
            .values()
            .filter(|p| p.competition_id == competition_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn replace_participation(
        &self,
        expected: &Participation,
        participation: &Participation,
        count_delta: i32,
    ) -> Result<Competition> {
        let mut tables = self.tables.lock();
        let stored = tables
            .participations
            .get(&participation.id)
            .ok_or_else(|| participation_not_found(participation))?;
        if !same_version(stored, expected) {
            return Err(participation_changed(participation));
        }
        let competition = tables
            .competitions
            .get_mut(&participation.competition_id)
            .ok_or_else(|| competition_not_found(participation.competition_id))?;
        if count_delta > 0 && competition.is_full() {
            return Err(competition_full());
        }
        competition.participant_count = shift_count(competition.participant_count, count_delta);
        let updated = competition.clone();

        tables
            .participations
            .insert(participation.id, participation.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures;

    #[tokio::test]
    async fn test_store_contract() {
        fixtures::exercise_store(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_participations_survive_delete() {
        let store = MemoryStore::new();
        let c = fixtures::competition("audit", 1);
        store.insert_competition(&c).await.unwrap();
        store
            .insert_participation(&fixtures::participation(c.id, "dana"))
            .await
            .unwrap();
        store.delete_competition(c.id).await.unwrap();
        assert_eq!(store.list_participations(c.id).await.unwrap().len(), 1);
    }
}
