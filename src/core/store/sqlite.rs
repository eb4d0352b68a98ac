use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AgentLogEntry, AgentRecord, AgentStore, LogLevel, NewAgent};
use crate::core::orchestrator::AgentStatus;

pub struct SqliteAgentStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteAgentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path)?;
        Self::from_connection(db)
    }

    /// In-memory database, used by tests and `--ephemeral` runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS agent_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                meta TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_logs_agent ON agent_logs(agent_id, id)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Shared connection handle so the credentials vault can live in the same
    /// database file.
    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(AgentRecord, String, String)> {
    let config: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok((
        AgentRecord {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            agent_type: row.get(3)?,
            config: serde_json::Value::Null,
            status: AgentStatus::Pending,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        },
        config,
        status,
    ))
}

fn finish_record(parts: (AgentRecord, String, String)) -> Result<AgentRecord> {
    let (mut record, config, status) = parts;
    record.config = serde_json::from_str(&config).unwrap_or(serde_json::Value::Null);
    record.status = AgentStatus::from_status(&status)
        .ok_or_else(|| anyhow!("unknown agent status '{}' in store", status))?;
    Ok(record)
}

const SELECT_AGENT: &str =
    "SELECT id, owner_id, name, agent_type, config, status, created_at, updated_at FROM agents";

#[async_trait]
impl AgentStore for SqliteAgentStore {
    async fn create_agent(&self, agent: NewAgent) -> Result<AgentRecord> {
        let id = Uuid::new_v4().to_string();
        let config = serde_json::to_string(&agent.config)?;
        {
            let db = self.db.lock().await;
            db.execute(
                "INSERT INTO agents (id, owner_id, name, agent_type, config, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    agent.owner_id,
                    agent.name,
                    agent.agent_type,
                    config,
                    AgentStatus::Pending.as_str()
                ],
            )?;
        }
        self.find_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("agent row vanished after insert"))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<AgentRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("{} WHERE id = ?1", SELECT_AGENT))?;
        let mut rows = stmt.query_map(params![id], row_to_record)?;
        match rows.next() {
            Some(row) => Ok(Some(finish_record(row?)?)),
            None => Ok(None),
        }
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<AgentRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{} WHERE owner_id = ?1 ORDER BY created_at",
            SELECT_AGENT
        ))?;
        let rows = stmt.query_map(params![owner_id], row_to_record)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(finish_record(row?)?);
        }
        Ok(results)
    }

    async fn find_all_by_status(&self, statuses: &[AgentStatus]) -> Result<Vec<AgentRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{} WHERE status IN ({}) ORDER BY created_at",
            SELECT_AGENT, placeholders
        ))?;
        let values: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_record)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(finish_record(row?)?);
        }
        Ok(results)
    }

    async fn update_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE agents SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(anyhow!("no agent row for id '{}'", id));
        }
        Ok(())
    }

    async fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<()> {
        let meta = meta.map(|m| m.to_string());
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agent_logs (agent_id, level, message, meta) VALUES (?1, ?2, ?3, ?4)",
            params![id, level.as_str(), message, meta],
        )?;
        Ok(())
    }

    async fn find_logs(&self, id: &str, limit: u32, offset: u32) -> Result<Vec<AgentLogEntry>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, agent_id, level, message, meta, created_at FROM agent_logs
             WHERE agent_id = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![id, limit, offset], |row| {
            let level: String = row.get(2)?;
            let meta: Option<String> = row.get(4)?;
            Ok(AgentLogEntry {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                level: LogLevel::from_level(&level).unwrap_or(LogLevel::Info),
                message: row.get(3)?,
                meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
                created_at: row.get(5)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn delete_agent(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM agent_logs WHERE agent_id = ?1", params![id])?;
        let deleted = db.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_agent(owner: &str, name: &str) -> NewAgent {
        NewAgent {
            owner_id: owner.to_string(),
            name: name.to_string(),
            agent_type: "assistant".to_string(),
            config: serde_json::json!({ "greeting": "hi" }),
        }
    }

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let store = SqliteAgentStore::open_in_memory().unwrap();
        let created = store.create_agent(new_agent("o1", "scout")).await.unwrap();
        assert_eq!(created.status, AgentStatus::Pending);
        assert_eq!(created.config["greeting"], "hi");

        let found = store.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(found.name, "scout");
        assert_eq!(found.owner_id, "o1");
    }

    #[tokio::test]
    async fn list_by_owner_is_scoped() {
        let store = SqliteAgentStore::open_in_memory().unwrap();
        store.create_agent(new_agent("o1", "a")).await.unwrap();
        store.create_agent(new_agent("o1", "b")).await.unwrap();
        store.create_agent(new_agent("o2", "c")).await.unwrap();

        assert_eq!(store.list_by_owner("o1").await.unwrap().len(), 2);
        assert_eq!(store.list_by_owner("o2").await.unwrap().len(), 1);
        assert!(store.list_by_owner("o3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_all_by_status_filters() {
        let store = SqliteAgentStore::open_in_memory().unwrap();
        let a = store.create_agent(new_agent("o1", "a")).await.unwrap();
        let b = store.create_agent(new_agent("o1", "b")).await.unwrap();
        store.create_agent(new_agent("o1", "c")).await.unwrap();

        store.update_status(&a.id, AgentStatus::Running).await.unwrap();
        store.update_status(&b.id, AgentStatus::Error).await.unwrap();

        let hits = store
            .find_all_by_status(&[AgentStatus::Running, AgentStatus::Error])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let none = store.find_all_by_status(&[]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn update_status_on_missing_row_errors() {
        let store = SqliteAgentStore::open_in_memory().unwrap();
        assert!(
            store
                .update_status("nope", AgentStatus::Running)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn logs_are_newest_first_and_paginated() {
        let store = SqliteAgentStore::open_in_memory().unwrap();
        let agent = store.create_agent(new_agent("o1", "a")).await.unwrap();
        for i in 0..5 {
            store
                .append_log(&agent.id, LogLevel::Info, &format!("line {}", i), None)
                .await
                .unwrap();
        }

        let page = store.find_logs(&agent.id, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message, "line 4");
        assert_eq!(page[1].message, "line 3");

        let next = store.find_logs(&agent.id, 2, 2).await.unwrap();
        assert_eq!(next[0].message, "line 2");
    }

    #[tokio::test]
    async fn log_meta_round_trips_as_json() {
        let store = SqliteAgentStore::open_in_memory().unwrap();
        let agent = store.create_agent(new_agent("o1", "a")).await.unwrap();
        store
            .append_log(
                &agent.id,
                LogLevel::Error,
                "boom",
                Some(serde_json::json!({ "retry_in_secs": 30 })),
            )
            .await
            .unwrap();

        let logs = store.find_logs(&agent.id, 10, 0).await.unwrap();
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(logs[0].meta.as_ref().unwrap()["retry_in_secs"], 30);
    }

    #[tokio::test]
    async fn delete_agent_cascades_logs() {
        let store = SqliteAgentStore::open_in_memory().unwrap();
        let agent = store.create_agent(new_agent("o1", "a")).await.unwrap();
        store
            .append_log(&agent.id, LogLevel::Info, "hello", None)
            .await
            .unwrap();

        assert!(store.delete_agent(&agent.id).await.unwrap());
        assert!(store.find_by_id(&agent.id).await.unwrap().is_none());
        assert!(store.find_logs(&agent.id, 10, 0).await.unwrap().is_empty());
        assert!(!store.delete_agent(&agent.id).await.unwrap());
    }

    #[tokio::test]
    async fn rows_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.db");

        let id = {
            let store = SqliteAgentStore::open(&path).unwrap();
            let agent = store.create_agent(new_agent("o1", "a")).await.unwrap();
            store
                .update_status(&agent.id, AgentStatus::Running)
                .await
                .unwrap();
            agent.id
        };

        let reopened = SqliteAgentStore::open(&path).unwrap();
        let found = reopened.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.status, AgentStatus::Running);
    }
}
