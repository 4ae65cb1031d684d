//! SQLite-backed chunk store.
//!
//! Embeddings are stored as little-endian f32 blobs; cosine distance is
//! computed in Rust at query time. Document versioning is tracked in a
//! `documents` table whose `active_version` column gates the search set.

use crate::store::{cosine_distance, rank_scored, ChunkStore, StoreStats};
use crate::types::{Chunk, Document, ScopeFilter};
use dossier_core::{AppError, AppResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// SQLite chunk store.
///
/// A single connection guarded by a mutex; the engine's workload is
/// read-mostly and the answering pipeline itself is sequential per query.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given database path.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Store(format!("Failed to create index directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Store(format!("Failed to open SQLite index: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                page_count INTEGER NOT NULL,
                active_version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                document_version INTEGER NOT NULL,
                position INTEGER NOT NULL,
                page INTEGER NOT NULL,
                section TEXT,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document
                ON chunks(document_id, document_version);
            "#,
        )
        .map_err(|e| AppError::Store(format!("Failed to create tables: {}", e)))?;

        tracing::debug!("Initialized SQLite chunk store at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Store("store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl ChunkStore for SqliteStore {
    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        scope: &ScopeFilter,
    ) -> AppResult<Vec<(Chunk, f32)>> {
        if k == 0 {
            return Err(AppError::Store("search requires k >= 1".to_string()));
        }

        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT c.id, c.document_id, c.document_version, c.position, c.page,
                    c.section, c.text, c.embedding
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.document_version = d.active_version",
        )?;

        let chunks_iter = stmt.query_map([], |row| {
            let embedding_bytes: Vec<u8> = row.get(7)?;
            let embedding = bytes_to_embedding(&embedding_bytes)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

            Ok(Chunk {
                id: row.get(0)?,
                document_id: row.get(1)?,
                document_version: row.get::<_, i64>(2)? as u32,
                position: row.get::<_, i64>(3)? as u32,
                page: row.get::<_, i64>(4)? as u32,
                section: row.get(5)?,
                text: row.get(6)?,
                embedding: Some(embedding),
            })
        })?;

        let scored: Vec<(Chunk, f32)> = chunks_iter
            .filter_map(|r| match r {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    tracing::warn!("Skipping undecodable chunk row: {}", e);
                    None
                }
            })
            .filter(|chunk| scope.matches(chunk))
            .filter_map(|chunk| {
                let distance = chunk
                    .embedding
                    .as_ref()
                    .map(|e| cosine_distance(query_embedding, e))?;
                Some((chunk, distance))
            })
            .collect();

        let results = rank_scored(scored, k);

        tracing::debug!("Retrieved {} chunks (requested top-{})", results.len(), k);
        Ok(results)
    }

    async fn upsert_document(&self, document: &Document, chunks: Vec<Chunk>) -> AppResult<()> {
        for chunk in &chunks {
            if chunk.document_id != document.id || chunk.document_version != document.version {
                return Err(AppError::Store(format!(
                    "Chunk {} does not belong to document {} v{}",
                    chunk.id, document.id, document.version
                )));
            }
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Store(format!("Failed to begin transaction: {}", e)))?;

        // Flipping active_version atomically supersedes the prior version;
        // its chunks stay on disk for audit but leave the search set.
        tx.execute(
            "INSERT INTO documents (id, page_count, active_version) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET page_count = ?2, active_version = ?3",
            params![document.id, document.page_count as i64, document.version as i64],
        )?;

        for chunk in &chunks {
            let embedding = chunk
                .embedding
                .as_ref()
                .ok_or_else(|| AppError::Store(format!("Chunk {} missing embedding", chunk.id)))?;

            tx.execute(
                "INSERT OR REPLACE INTO chunks
                 (id, document_id, document_version, position, page, section, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    chunk.id,
                    chunk.document_id,
                    chunk.document_version as i64,
                    chunk.position as i64,
                    chunk.page as i64,
                    chunk.section,
                    chunk.text,
                    embedding_to_bytes(embedding),
                ],
            )?;
        }

        tx.commit()
            .map_err(|e| AppError::Store(format!("Failed to commit document: {}", e)))?;

        tracing::info!(
            "Stored document {} v{} ({} chunks)",
            document.id,
            document.version,
            chunks.len()
        );
        Ok(())
    }

    async fn active_version(&self, document_id: &str) -> AppResult<Option<u32>> {
        let conn = self.lock()?;
        let version = conn
            .query_row(
                "SELECT active_version FROM documents WHERE id = ?1",
                params![document_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| Some(v as u32));

        match version {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stats(&self) -> AppResult<StoreStats> {
        let conn = self.lock()?;

        let documents: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let total_chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let active_chunks: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.document_version = d.active_version",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            documents: documents as u32,
            active_chunks: active_chunks as u32,
            total_chunks: total_chunks as u32,
        })
    }
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Store("Invalid embedding bytes length".to_string()));
    }

    let mut embedding = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        embedding.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn chunk(id: &str, document_id: &str, version: u32, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: document_id.to_string(),
            document_version: version,
            position: 0,
            page: 2,
            section: Some("Decision".to_string()),
            text: format!("chunk {}", id),
            embedding: Some(embedding),
        }
    }

    fn document(id: &str, version: u32) -> Document {
        Document {
            id: id.to_string(),
            text: String::new(),
            page_count: 3,
            version,
        }
    }

    #[tokio::test]
    async fn test_insert_and_search() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(temp_file.path()).unwrap();

        store
            .upsert_document(
                &document("doc", 1),
                vec![
                    chunk("a", "doc", 1, vec![1.0, 0.0, 0.0]),
                    chunk("b", "doc", 1, vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = store
            .search(&[1.0, 0.0, 0.0], 5, &ScopeFilter::all())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id, "a");
        assert_eq!(results[0].0.page, 2);
        assert_eq!(results[0].0.section.as_deref(), Some("Decision"));
    }

    #[tokio::test]
    async fn test_version_supersession_survives_reopen() {
        let temp_file = NamedTempFile::new().unwrap();

        {
            let store = SqliteStore::open(temp_file.path()).unwrap();
            store
                .upsert_document(
                    &document("doc", 1),
                    vec![chunk("old", "doc", 1, vec![1.0, 0.0, 0.0])],
                )
                .await
                .unwrap();
            store
                .upsert_document(
                    &document("doc", 2),
                    vec![chunk("new", "doc", 2, vec![1.0, 0.0, 0.0])],
                )
                .await
                .unwrap();
        }

        let store = SqliteStore::open(temp_file.path()).unwrap();
        let results = store
            .search(&[1.0, 0.0, 0.0], 5, &ScopeFilter::all())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "new");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.active_chunks, 1);
    }

    #[tokio::test]
    async fn test_scope_filter() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(temp_file.path()).unwrap();

        store
            .upsert_document(
                &document("doc-a", 1),
                vec![chunk("a", "doc-a", 1, vec![1.0, 0.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .upsert_document(
                &document("doc-b", 1),
                vec![chunk("b", "doc-b", 1, vec![1.0, 0.0, 0.0])],
            )
            .await
            .unwrap();

        let scope = ScopeFilter::documents(vec!["doc-b".to_string()]);
        let results = store.search(&[1.0, 0.0, 0.0], 5, &scope).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "b");
    }

    #[tokio::test]
    async fn test_corrupt_embedding_is_skipped_not_fatal() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(temp_file.path()).unwrap();

        store
            .upsert_document(
                &document("doc", 1),
                vec![
                    chunk("a", "doc", 1, vec![1.0, 0.0, 0.0]),
                    chunk("b", "doc", 1, vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        {
            let conn = Connection::open(temp_file.path()).unwrap();
            conn.execute("UPDATE chunks SET embedding = x'0102' WHERE id = 'a'", [])
                .unwrap();
        }

        let store = SqliteStore::open(temp_file.path()).unwrap();
        let results = store
            .search(&[1.0, 0.0, 0.0], 5, &ScopeFilter::all())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "b");
    }

    #[test]
    fn test_embedding_round_trip() {
        let original = vec![0.25, -1.5, 3.75];
        let bytes = embedding_to_bytes(&original);
        let back = bytes_to_embedding(&bytes).unwrap();
        assert_eq!(original, back);

        assert!(bytes_to_embedding(&[0, 1, 2]).is_err());
    }
}
