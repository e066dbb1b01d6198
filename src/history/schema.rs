//! Database schema for node run history

use anyhow::Result;
use rusqlite::Connection;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS node_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            workflow TEXT NOT NULL,
            node_id TEXT NOT NULL,
            success INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            error TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_node_runs_node ON node_runs(workflow, node_id);
        CREATE INDEX IF NOT EXISTS idx_node_runs_run ON node_runs(run_id);
        CREATE INDEX IF NOT EXISTS idx_node_runs_created ON node_runs(created_at);
        "#,
    )?;

    Ok(())
}
