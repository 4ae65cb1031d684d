//! Answer archive: every completed query run is persisted for audit.

use crate::types::{AnswerRecord, Citation};
use chrono::{DateTime, Utc};
use dossier_core::{AppError, AppResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Persists completed answers.
#[async_trait::async_trait]
pub trait AnswerArchive: Send + Sync {
    /// Store one completed run.
    async fn record(&self, record: &AnswerRecord) -> AppResult<()>;

    /// List records, newest first, up to `limit`.
    async fn list(&self, limit: usize) -> AppResult<Vec<AnswerRecord>>;

    /// Total number of archived runs.
    async fn count(&self) -> AppResult<u64>;
}

/// SQLite-backed archive. Citations and chunk-id lists are stored as JSON
/// text columns; they are read back whole, never queried into.
pub struct SqliteArchive {
    conn: Mutex<Connection>,
}

impl SqliteArchive {
    pub fn open(path: &Path) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS answers (
                id                  TEXT PRIMARY KEY,
                query               TEXT NOT NULL,
                answer              TEXT NOT NULL,
                citations           TEXT NOT NULL,
                revision_count      INTEGER NOT NULL,
                retrieved_chunk_ids TEXT NOT NULL,
                created_at          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_answers_created ON answers(created_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Store("archive connection poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl AnswerArchive for SqliteArchive {
    async fn record(&self, record: &AnswerRecord) -> AppResult<()> {
        let citations = serde_json::to_string(&record.citations)?;
        let chunk_ids = serde_json::to_string(&record.retrieved_chunk_ids)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO answers (id, query, answer, citations, revision_count, retrieved_chunk_ids, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.query,
                record.answer,
                citations,
                record.revision_count,
                chunk_ids,
                record.created_at.to_rfc3339(),
            ],
        )?;
        debug!("Archived answer {}", record.id);
        Ok(())
    }

    async fn list(&self, limit: usize) -> AppResult<Vec<AnswerRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, query, answer, citations, revision_count, retrieved_chunk_ids, created_at
             FROM answers ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, query, answer, citations, revision_count, chunk_ids, created_at) = row?;
            let citations: Vec<Citation> = serde_json::from_str(&citations)?;
            let retrieved_chunk_ids: Vec<String> = serde_json::from_str(&chunk_ids)?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| AppError::Store(format!("bad timestamp in archive: {}", e)))?
                .with_timezone(&Utc);
            records.push(AnswerRecord {
                id,
                query,
                answer,
                citations,
                revision_count,
                retrieved_chunk_ids,
                created_at,
            });
        }
        Ok(records)
    }

    async fn count(&self) -> AppResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM answers", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(query: &str, created_at: DateTime<Utc>) -> AnswerRecord {
        AnswerRecord {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            answer: format!("answer to {}", query),
            citations: vec![Citation {
                chunk_id: "c1".to_string(),
                page: 2,
                section: Some("Decision".to_string()),
            }],
            revision_count: 1,
            retrieved_chunk_ids: vec!["c1".to_string(), "c2".to_string()],
            created_at,
        }
    }

    #[tokio::test]
    async fn test_record_and_list_round_trip() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let archive = SqliteArchive::open(file.path()).unwrap();

        let rec = record("what is the decision date", Utc::now());
        archive.record(&rec).await.unwrap();

        let listed = archive.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].query, rec.query);
        assert_eq!(listed[0].citations, rec.citations);
        assert_eq!(listed[0].retrieved_chunk_ids, rec.retrieved_chunk_ids);
        assert_eq!(listed[0].revision_count, 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_limited() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let archive = SqliteArchive::open(file.path()).unwrap();

        let base = Utc::now();
        for i in 0..3 {
            let rec = record(
                &format!("query {}", i),
                base + chrono::Duration::seconds(i),
            );
            archive.record(&rec).await.unwrap();
        }

        let listed = archive.list(2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].query, "query 2");
        assert_eq!(listed[1].query, "query 1");
        assert_eq!(archive.count().await.unwrap(), 3);
    }
}
