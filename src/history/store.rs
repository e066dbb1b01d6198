//! Persistent node run history

use super::schema::init_schema;
use super::{ExecutionHistory, HISTORY_WINDOW, Sample, history_key};
use crate::workflow::{NodeState, RunReport};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One persisted node outcome
#[derive(Debug, Clone)]
pub struct NodeRunRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub workflow: String,
    pub node_id: String,
    pub success: bool,
    pub duration_ms: i64,
    pub attempts: i64,
    pub error: Option<String>,
    pub created_at: String,
}

/// SQLite-backed history of node outcomes
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Open or create the history database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create history directory at {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open history database at {}", path.display()))?;

        init_schema(&conn)?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Default database path under the user config directory
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("dagflow").join("history.db"))
    }

    /// Persist the final outcome of every node that ran
    pub fn record_report(&mut self, report: &RunReport) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO node_runs (run_id, workflow, node_id, success, duration_ms, attempts, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for node in &report.nodes {
                let success = match node.state {
                    NodeState::Completed => true,
                    NodeState::Failed => false,
                    _ => continue,
                };
                stmt.execute((
                    &report.run_id,
                    &report.workflow,
                    &node.id,
                    success,
                    node.duration_ms.unwrap_or(0) as i64,
                    i64::from(node.attempts),
                    node.error.as_ref().map(|e| e.to_string()),
                    &now,
                ))?;
                written += 1;
            }
        }
        tx.commit()?;

        tracing::debug!(run_id = %report.run_id, written, "Recorded node history");
        Ok(written)
    }

    /// Load the most recent samples of every node into `history`
    pub fn load_into(&self, history: &ExecutionHistory) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT workflow, node_id, success, duration_ms FROM (
                 SELECT workflow, node_id, success, duration_ms, id,
                        ROW_NUMBER() OVER (PARTITION BY workflow, node_id ORDER BY id DESC) AS rn
                 FROM node_runs
             )
             WHERE rn <= ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map([HISTORY_WINDOW as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let count = rows.len();
        for (workflow, node_id, success, duration_ms) in rows {
            history.record(
                &history_key(&workflow, &node_id),
                Sample {
                    success,
                    duration: Duration::from_millis(duration_ms.max(0) as u64),
                },
            );
        }
        Ok(count)
    }

    /// Most recent records, optionally for one node id
    pub fn recent(&self, node: Option<&str>, limit: usize) -> Result<Vec<NodeRunRecord>> {
        let row_mapper = |row: &rusqlite::Row| -> rusqlite::Result<NodeRunRecord> {
            Ok(NodeRunRecord {
                id: Some(row.get(0)?),
                run_id: row.get(1)?,
                workflow: row.get(2)?,
                node_id: row.get(3)?,
                success: row.get(4)?,
                duration_ms: row.get(5)?,
                attempts: row.get(6)?,
                error: row.get(7)?,
                created_at: row.get(8)?,
            })
        };

        let limit = limit as i64;
        let records = match node {
            Some(node) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, run_id, workflow, node_id, success, duration_ms, attempts, error, created_at
                     FROM node_runs
                     WHERE node_id = ?1
                     ORDER BY id DESC
                     LIMIT ?2",
                )?;
                stmt.query_map((node, limit), row_mapper)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, run_id, workflow, node_id, success, duration_ms, attempts, error, created_at
                     FROM node_runs
                     ORDER BY id DESC
                     LIMIT ?1",
                )?;
                stmt.query_map([limit], row_mapper)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{NodeError, NodeStatus, NodeType, RunState, RunStats};
    use tempfile::TempDir;

    fn node(id: &str, state: NodeState, ms: u64) -> NodeStatus {
        NodeStatus {
            id: id.into(),
            node_type: NodeType::Task,
            state,
            attempts: 1,
            critical: false,
            started_at: None,
            completed_at: None,
            duration_ms: Some(ms),
            error: (state == NodeState::Failed).then(|| NodeError::execution("exit 1")),
            skip_reason: None,
            output: None,
        }
    }

    fn report(run_id: &str, nodes: Vec<NodeStatus>) -> RunReport {
        let now = chrono::Utc::now();
        RunReport {
            run_id: run_id.into(),
            workflow: "deploy".into(),
            state: RunState::Completed,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            stats: RunStats::from_nodes(&nodes),
            nodes,
            context: Default::default(),
            error: None,
        }
    }

    #[test]
    fn test_record_skips_unfinished_nodes() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let written = store
            .record_report(&report(
                "r1",
                vec![
                    node("build", NodeState::Completed, 120),
                    node("test", NodeState::Failed, 40),
                    node("ship", NodeState::Skipped, 0),
                ],
            ))
            .unwrap();
        assert_eq!(written, 2);

        let recent = store.recent(Some("test"), 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].success);
        assert_eq!(recent[0].error.as_deref(), Some("exit 1"));
    }

    #[test]
    fn test_load_into_keeps_window() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        for i in 0..15 {
            let state = if i < 5 {
                NodeState::Failed
            } else {
                NodeState::Completed
            };
            store
                .record_report(&report(&format!("r{i}"), vec![node("build", state, 100)]))
                .unwrap();
        }

        let history = ExecutionHistory::new();
        let loaded = store.load_into(&history).unwrap();
        assert_eq!(loaded, HISTORY_WINDOW);

        let stats = history.stats("deploy/build").unwrap();
        assert_eq!(stats.samples, HISTORY_WINDOW);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.mean_duration, Duration::from_millis(100));
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.db");

        let mut store = HistoryStore::open(&path).unwrap();
        store
            .record_report(&report("r1", vec![node("a", NodeState::Completed, 5)]))
            .unwrap();
        drop(store);

        let reopened = HistoryStore::open(&path).unwrap();
        assert_eq!(reopened.recent(None, 10).unwrap().len(), 1);
    }
}
