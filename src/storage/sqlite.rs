//! SQLite store
//!
//! Each record is kept as a JSON document next to the columns used for
//! lookups. Multi-row operations run in a transaction.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{
    already_registered, apply_filter, competition_full, competition_not_found, invalid_transition,
    merge_editable, participation_changed, participation_not_found, same_version, shift_count,
    CompetitionStore,
};
use crate::error::Result;
use crate::models::{Competition, CompetitionFilter, CompetitionStatus, Participation};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS competitions (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    start_date TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_competitions_status ON competitions(status);

CREATE TABLE IF NOT EXISTS participations (
    id TEXT PRIMARY KEY,
    competition_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    data TEXT NOT NULL,
    UNIQUE (competition_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_participations_competition ON participations(competition_id);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!("Opened SQLite store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn load_competition(conn: &Connection, id: Uuid) -> Result<Option<Competition>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM competitions WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match data {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn save_competition(tx: &Transaction<'_>, c: &Competition) -> Result<()> {
    tx.execute(
        "UPDATE competitions SET status = ?2, start_date = ?3, data = ?4 WHERE id = ?1",
        params![
            c.id.to_string(),
            c.status.as_str(),
            c.start_date.to_rfc3339(),
            serde_json::to_string(c)?
        ],
    )?;
    Ok(())
}

fn load_participation(
    conn: &Connection,
    competition_id: Uuid,
    user_id: &str,
) -> Result<Option<Participation>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM participations WHERE competition_id = ?1 AND user_id = ?2",
            params![competition_id.to_string(), user_id],
            |row| row.get(0),
        )
        .optional()?;
    match data {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl CompetitionStore for SqliteStore {
    async fn insert_competition(&self, competition: &Competition) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO competitions (id, status, start_date, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                competition.id.to_string(),
                competition.status.as_str(),
                competition.start_date.to_rfc3339(),
                serde_json::to_string(competition)?
            ],
        )?;
        Ok(())
    }

    async fn find_competition(&self, id: Uuid) -> Result<Option<Competition>> {
        let conn = self.conn.lock();
        load_competition(&conn, id)
    }

    async fn list_competitions(&self, filter: &CompetitionFilter) -> Result<Vec<Competition>> {
        let conn = self.conn.lock();
        let rows: Vec<String> = match filter.status {
            Some(status) => {
                let mut stmt = conn.prepare("SELECT data FROM competitions WHERE status = ?1")?;
                let rows = stmt
                    .query_map(params![status.as_str()], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare("SELECT data FROM competitions")?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        let competitions = rows
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<std::result::Result<Vec<Competition>, _>>()?;
        Ok(apply_filter(competitions, filter))
    }

    async fn update_competition(&self, competition: &Competition) -> Result<Competition> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut stored =
            load_competition(&tx, competition.id)?.ok_or_else(|| competition_not_found(competition.id))?;
        merge_editable(&mut stored, competition);
        save_competition(&tx, &stored)?;
        tx.commit()?;
        Ok(stored)
    }

    async fn delete_competition(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM competitions WHERE id = ?1",
            params![id.to_string()],
        )?;
        if deleted == 0 {
            return Err(competition_not_found(id));
        }
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: CompetitionStatus,
        to: CompetitionStatus,
        at: DateTime<Utc>,
    ) -> Result<Competition> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut stored = load_competition(&tx, id)?.ok_or_else(|| competition_not_found(id))?;
        if stored.status != from {
            return Err(invalid_transition(stored.status, to));
        }
        stored.status = to;
        stored.updated_at = at;
        save_competition(&tx, &stored)?;
        tx.commit()?;
        Ok(stored)
    }

    async fn insert_participation(&self, participation: &Participation) -> Result<Competition> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if load_participation(&tx, participation.competition_id, &participation.user_id)?.is_some()
        {
            return Err(already_registered());
        }
        let mut competition = load_competition(&tx, participation.competition_id)?
            .ok_or_else(|| competition_not_found(participation.competition_id))?;
        if competition.is_full() {
            return Err(competition_full());
        }
        competition.participant_count += 1;

        tx.execute(
            "INSERT INTO participations (id, competition_id, user_id, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                participation.id.to_string(),
                participation.competition_id.to_string(),
                participation.user_id,
                serde_json::to_string(participation)?
            ],
        )?;
        save_competition(&tx, &competition)?;
        tx.commit()?;
        Ok(competition)
    }

    async fn find_participation(
        &self,
        competition_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Participation>> {
        let conn = self.conn.lock();
        load_participation(&conn, competition_id, user_id)
    }

    async fn list_participations(&self, competition_id: Uuid) -> Result<Vec<Participation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM participations WHERE competition_id = ?1")?;
        let rows = stmt
            .query_map(params![competition_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut list = rows
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<std::result::Result<Vec<Participation>, _>>()?;
        list.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn replace_participation(
        &self,
        expected: &Participation,
        participation: &Participation,
        count_delta: i32,
    ) -> Result<Competition> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let stored = load_participation(&tx, participation.competition_id, &participation.user_id)?
            .filter(|p| p.id == participation.id)
            .ok_or_else(|| participation_not_found(participation))?;
        if !same_version(&stored, expected) {
            return Err(participation_changed(participation));
        }
        let mut competition = load_competition(&tx, participation.competition_id)?
            .ok_or_else(|| competition_not_found(participation.competition_id))?;
        if count_delta > 0 && competition.is_full() {
            return Err(competition_full());
        }

        tx.execute(
            "UPDATE participations SET data = ?2 WHERE id = ?1",
            params![
                participation.id.to_string(),
                serde_json::to_string(participation)?
            ],
        )?;
        if count_delta != 0 {
            competition.participant_count =
                shift_count(competition.participant_count, count_delta);
            save_competition(&tx, &competition)?;
        }
        tx.commit()?;
        Ok(competition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures;

    #[tokio::test]
    async fn test_store_contract() {
        fixtures::exercise_store(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contest.db");
        let c = fixtures::competition("persisted", 3);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_competition(&c).await.unwrap();
            store
                .insert_participation(&fixtures::participation(c.id, "erin"))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let found = store.find_competition(c.id).await.unwrap().unwrap();
        assert_eq!(found.name, "persisted");
        assert_eq!(found.participant_count, 1);
        assert!(store
            .find_participation(c.id, "erin")
            .await
            .unwrap()
            .is_some());
    }
}
