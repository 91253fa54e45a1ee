//! The persisted retrieval index.
//!
//! A single SQLite file holds every chunk of the policy document, one
//! embedding per chunk, and a small metadata table recording what the index
//! was built from. Similarity search is a brute-force cosine scan over all
//! stored vectors, which is plenty for a single policy document.
//!
//! Writers replace the whole index inside one transaction, so readers on
//! other pool connections see either the old index or the new one, never a
//! mix.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, Passage};

const META_FINGERPRINT: &str = "fingerprint";
const META_MODEL: &str = "model";
const META_BUILT_AT: &str = "built_at";

/// Handle to an open index database. Cheap to clone.
#[derive(Clone)]
pub struct PolicyIndex {
    pool: SqlitePool,
}

impl PolicyIndex {
    /// Open for writing, creating the file and schema if needed.
    pub async fn create(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an index that an earlier build produced.
    ///
    /// Fails if the file or schema is missing; an empty index opens fine
    /// and is reported by [`is_populated`](Self::is_populated).
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_existing(path).await?;
        if !migrate::schema_exists(&pool).await? {
            pool.close().await;
            bail!("index at {} has not been initialized", path.display());
        }
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn is_populated(&self) -> Result<bool> {
        Ok(self.chunk_count().await? > 0)
    }

    /// Fingerprint of the build currently stored, if any.
    pub async fn fingerprint(&self) -> Result<Option<String>> {
        self.meta(META_FINGERPRINT).await
    }

    /// Embedding model the stored vectors were produced with.
    pub async fn model(&self) -> Result<Option<String>> {
        self.meta(META_MODEL).await
    }

    async fn meta(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Atomically replace the entire index contents.
    pub async fn replace_all(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
        fingerprint: &str,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                "INSERT INTO chunks (id, chunk_index, source, page, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(chunk.chunk_index)
            .bind(&chunk.source)
            .bind(chunk.page)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, model, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        for (key, value) in [
            (META_FINGERPRINT, fingerprint),
            (META_MODEL, model),
            (META_BUILT_AT, now.as_str()),
        ] {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Top-`k` chunks by cosine similarity to `query_vec`, best first.
    ///
    /// Ties are broken by chunk order so results are deterministic. Fails
    /// when `query_vec` and the stored vectors differ in length.
    pub async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<Passage>> {
        let rows = sqlx::query(
            r#"
            SELECT c.chunk_index, c.source, c.page, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            ORDER BY c.chunk_index
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(f64, i64, Passage)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            if stored.len() != query_vec.len() {
                bail!(
                    "query vector has {} dimensions but the index stores {}; rebuild with `intelliclaim index --rebuild`",
                    query_vec.len(),
                    stored.len()
                );
            }
            let similarity = cosine_similarity(query_vec, &stored) as f64;
            let page: Option<i64> = row.get("page");
            let passage = Passage {
                content: row.get("text"),
                source: row.get("source"),
                page: page.map(|p| p.to_string()),
                score: similarity,
            };
            scored.push((similarity, row.get::<i64, _>("chunk_index"), passage));
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, _, p)| p).collect())
    }
}
