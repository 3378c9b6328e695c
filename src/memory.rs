use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use serde_json::{Value, json};

use crate::{GatewayFileConfig, log_info, now_ms};

const DEFAULT_DB_PATH: &str = "./data/nexusgate-memory.sqlite";

/// SQLite-backed note store shared by the memory tools. One connection per
/// request is fine at gateway volumes; WAL keeps readers out of writers' way.
pub(crate) struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub(crate) fn open(path: &Path) -> Result<MemoryStore, String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("create memory dir {}: {e}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| format!("open memory db {}: {e}", path.display()))?;
        Self::init(conn)
    }

    pub(crate) fn open_from_config(cfg: &GatewayFileConfig) -> Result<MemoryStore, String> {
        let path = cfg
            .memory
            .db
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        Self::open(&path)
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<MemoryStore, String> {
        let conn = Connection::open_in_memory().map_err(|e| e.to_string())?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<MemoryStore, String> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| format!("memory db pragma: {e}"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT,
                text TEXT NOT NULL,
                tags TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at);",
        )
        .map_err(|e| format!("memory db schema: {e}"))?;
        Ok(MemoryStore { conn })
    }

    pub(crate) fn write(
        &self,
        session: Option<&str>,
        text: &str,
        tags: &[String],
    ) -> Result<i64, String> {
        let tags_joined = if tags.is_empty() {
            None
        } else {
            Some(tags.join(","))
        };
        self.conn
            .execute(
                "INSERT INTO entries (session, text, tags, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![session, text, tags_joined, now_ms() as i64],
            )
            .map_err(|e| format!("memory write: {e}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Token search: rows matching any query token are candidates, ranked by
    /// token overlap and then recency. A multi-word query does not require
    /// the exact phrase.
    pub(crate) fn search(&self, query: &str, limit: usize) -> Result<Vec<Value>, String> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        let sql = if tokens.is_empty() {
            "SELECT id, session, text, tags, created_at FROM entries
             ORDER BY created_at DESC, id DESC"
                .to_string()
        } else {
            let clauses: Vec<String> = (1..=tokens.len())
                .map(|i| format!("text LIKE ?{i}"))
                .collect();
            format!(
                "SELECT id, session, text, tags, created_at FROM entries
                 WHERE {} ORDER BY created_at DESC, id DESC",
                clauses.join(" OR ")
            )
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| format!("memory search: {e}"))?;
        let patterns: Vec<String> = tokens.iter().map(|t| format!("%{t}%")).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(patterns.iter()), |row| {
                let id: i64 = row.get(0)?;
                let session: Option<String> = row.get(1)?;
                let text: String = row.get(2)?;
                let tags: Option<String> = row.get(3)?;
                let created_at: i64 = row.get(4)?;
                Ok((id, session, text, tags, created_at))
            })
            .map_err(|e| format!("memory search: {e}"))?;

        let mut results = Vec::new();
        for row in rows {
            let (id, session, text, tags, created_at) = row.map_err(|e| e.to_string())?;
            let lowered = text.to_lowercase();
            let score = if tokens.is_empty() {
                1
            } else {
                tokens.iter().filter(|t| lowered.contains(t.as_str())).count()
            };
            results.push(json!({
                "id": id,
                "session": session,
                "text": text,
                "tags": tags
                    .map(|t| t.split(',').map(str::to_string).collect::<Vec<_>>())
                    .unwrap_or_default(),
                "created_at": created_at,
                "score": score,
            }));
        }
        results.sort_by(|a, b| {
            let sa = a["score"].as_u64().unwrap_or(0);
            let sb = b["score"].as_u64().unwrap_or(0);
            sb.cmp(&sa)
                .then_with(|| b["created_at"].as_i64().cmp(&a["created_at"].as_i64()))
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Drop exact-duplicate texts (keeping the newest copy) and entries older
    /// than `max_age_ms` when given. Returns counts for the caller to report.
    pub(crate) fn compact(&self, max_age_ms: Option<u64>) -> Result<Value, String> {
        let deduped = self
            .conn
            .execute(
                "DELETE FROM entries WHERE id NOT IN
                 (SELECT MAX(id) FROM entries GROUP BY text)",
                [],
            )
            .map_err(|e| format!("memory compact: {e}"))?;
        let expired = match max_age_ms {
            Some(age) => {
                let cutoff = now_ms().saturating_sub(age) as i64;
                self.conn
                    .execute("DELETE FROM entries WHERE created_at < ?1", params![cutoff])
                    .map_err(|e| format!("memory compact: {e}"))?
            }
            None => 0,
        };
        let remaining: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .map_err(|e| format!("memory compact: {e}"))?;
        log_info(
            "memory",
            &format!("compact removed {} duplicate, {} expired", deduped, expired),
        );
        Ok(json!({
            "removed_duplicates": deduped,
            "removed_expired": expired,
            "remaining": remaining,
        }))
    }
}
