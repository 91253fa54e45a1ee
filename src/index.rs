//! The indexing step: policy document → chunks → embeddings → [`PolicyIndex`].
//!
//! Runs once before queries are served (`intelliclaim index`, or at the start
//! of `intelliclaim serve`). Behavior against an already-populated index is
//! fixed by `index.on_existing`:
//!
//! | Value | Behavior |
//! |-------|----------|
//! | `reuse` | Skip if the stored fingerprint matches this document + settings, else rebuild |
//! | `rebuild` | Always rebuild |
//!
//! The fingerprint is a SHA-256 over the document bytes, chunk size,
//! overlap, and embedding model, so any change that would alter the stored
//! vectors forces a rebuild.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{ClaimError, Result};
use crate::extract::load_document;
use crate::store::PolicyIndex;

/// What to do when the target index already holds a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExisting {
    Reuse,
    Rebuild,
}

impl OnExisting {
    pub fn from_config(value: &str) -> Self {
        match value {
            "rebuild" => OnExisting::Rebuild,
            _ => OnExisting::Reuse,
        }
    }
}

/// Result of [`build_index`].
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub path: PathBuf,
    pub chunks: usize,
    /// `false` when an up-to-date build was reused.
    pub rebuilt: bool,
    pub fingerprint: String,
}

/// Build (or reuse) the index for `source` at `config.index.path`.
pub async fn build_index(
    config: &Config,
    embedder: &dyn Embedder,
    source: &Path,
    on_existing: OnExisting,
) -> Result<IndexSummary> {
    let pages = load_document(source)?;
    let fingerprint = fingerprint(config, embedder, source)?;
    let index_path = config.index.path.clone();

    let index = PolicyIndex::create(&index_path)
        .await
        .map_err(|e| ClaimError::Indexing(format!("cannot open index: {:#}", e)))?;

    let result = build_into(config, embedder, source, &pages, &fingerprint, &index, on_existing).await;
    index.close().await;

    let (chunks, rebuilt) = result?;
    Ok(IndexSummary {
        path: index_path,
        chunks,
        rebuilt,
        fingerprint,
    })
}

async fn build_into(
    config: &Config,
    embedder: &dyn Embedder,
    source: &Path,
    pages: &[crate::models::Page],
    fingerprint: &str,
    index: &PolicyIndex,
    on_existing: OnExisting,
) -> Result<(usize, bool)> {
    if on_existing == OnExisting::Reuse {
        let stored = index
            .fingerprint()
            .await
            .map_err(|e| ClaimError::Indexing(format!("cannot read index metadata: {:#}", e)))?;
        let populated = index
            .is_populated()
            .await
            .map_err(|e| ClaimError::Indexing(format!("cannot read index: {:#}", e)))?;

        if populated && stored.as_deref() == Some(fingerprint) {
            let count = index
                .chunk_count()
                .await
                .map_err(|e| ClaimError::Indexing(format!("cannot read index: {:#}", e)))?;
            tracing::info!(chunks = count, "index is up to date, reusing");
            return Ok((count as usize, false));
        }
    }

    let source_label = source.display().to_string();
    let chunks = chunk_pages(
        &source_label,
        pages,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    if chunks.is_empty() {
        return Err(ClaimError::Indexing(
            "could not create chunks from the document. Is it empty or corrupted?".to_string(),
        ));
    }
    tracing::info!(chunks = chunks.len(), source = %source_label, "chunked policy document");

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = embedder
            .embed(&texts)
            .await
            .map_err(|e| ClaimError::Indexing(format!("embedding failed: {:#}", e)))?;
        if batch_vectors.len() != texts.len() {
            return Err(ClaimError::Indexing(format!(
                "embedding provider returned {} vectors for {} chunks",
                batch_vectors.len(),
                texts.len()
            )));
        }
        vectors.extend(batch_vectors);
    }

    let expected_dims = embedder.dims();
    if let Some(bad) = vectors
        .iter()
        .find(|v| v.is_empty() || (expected_dims > 0 && v.len() != expected_dims))
    {
        return Err(ClaimError::Indexing(format!(
            "embedding has {} dimensions, expected {}",
            bad.len(),
            expected_dims
        )));
    }

    index
        .replace_all(&chunks, &vectors, embedder.model_name(), fingerprint)
        .await
        .map_err(|e| ClaimError::Indexing(format!("failed to persist index: {:#}", e)))?;

    tracing::info!(chunks = chunks.len(), model = embedder.model_name(), "index built");
    Ok((chunks.len(), true))
}

fn fingerprint(config: &Config, embedder: &dyn Embedder, source: &Path) -> Result<String> {
    let bytes = std::fs::read(source)
        .map_err(|e| ClaimError::Indexing(format!("failed to read {}: {}", source.display(), e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.update(config.chunking.chunk_size.to_le_bytes());
    hasher.update(config.chunking.chunk_overlap.to_le_bytes());
    hasher.update(embedder.model_name().as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
