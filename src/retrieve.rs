//! Passage retrieval.
//!
//! Two interchangeable [`Retriever`]s, selected by `retrieval.mode`:
//!
//! | Mode | Retriever | Source |
//! |------|-----------|--------|
//! | `vector` | [`VectorRetriever`] | persisted [`PolicyIndex`], cosine similarity |
//! | `keyword` | [`KeywordRetriever`] | in-memory document text, line matching |
//!
//! A retriever either returns passages, returns an explicit "not found"
//! sentinel, or fails with [`ClaimError::Retrieval`]. The three outcomes are
//! never conflated.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::embedding::{embed_query, Embedder};
use crate::error::{ClaimError, Result};
use crate::extract::load_document_text;
use crate::models::{Retrieval, NO_RELEVANT_INFORMATION};
use crate::store::PolicyIndex;

/// Text in, [`Retrieval`] out.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Short label for logs (`"vector"`, `"keyword"`).
    fn name(&self) -> &str;
    async fn retrieve(&self, term: &str) -> Result<Retrieval>;
}

// ============ Vector ============

/// Semantic search over the persisted index.
///
/// The index is opened on first use and the handle is reused afterwards.
/// An index built with a different embedding model is refused.
pub struct VectorRetriever {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    k: usize,
    index: OnceCell<PolicyIndex>,
}

impl VectorRetriever {
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>, k: usize) -> Self {
        Self {
            path: path.into(),
            embedder,
            k: k.max(1),
            index: OnceCell::new(),
        }
    }

    async fn index(&self) -> Result<&PolicyIndex> {
        self.index
            .get_or_try_init(|| async {
                let index = PolicyIndex::open(&self.path)
                    .await
                    .map_err(|e| ClaimError::Retrieval(format!("{:#}", e)))?;
                let populated = index
                    .is_populated()
                    .await
                    .map_err(|e| ClaimError::Retrieval(format!("{:#}", e)))?;
                if !populated {
                    index.close().await;
                    return Err(ClaimError::Retrieval(format!(
                        "index at {} is empty; run `intelliclaim index` first",
                        self.path.display()
                    )));
                }
                let built_with = index
                    .model()
                    .await
                    .map_err(|e| ClaimError::Retrieval(format!("{:#}", e)))?;
                let current = self.embedder.model_name();
                if let Some(built_with) = built_with.filter(|m| m != current) {
                    index.close().await;
                    return Err(ClaimError::Retrieval(format!(
                        "index built with model {}; current embedder is {}, run `intelliclaim index --rebuild`",
                        built_with, current
                    )));
                }
                Ok(index)
            })
            .await
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn name(&self) -> &str {
        "vector"
    }

    async fn retrieve(&self, term: &str) -> Result<Retrieval> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ClaimError::Retrieval("empty search term".into()));
        }

        let index = self.index().await?;
        let query_vec = embed_query(self.embedder.as_ref(), term)
            .await
            .map_err(|e| ClaimError::Retrieval(format!("query embedding failed: {:#}", e)))?;

        let passages = index
            .search(&query_vec, self.k)
            .await
            .map_err(|e| ClaimError::Retrieval(format!("index search failed: {:#}", e)))?;

        tracing::debug!(term, hits = passages.len(), "vector search");
        if passages.is_empty() {
            Ok(Retrieval::NotFound(NO_RELEVANT_INFORMATION.to_string()))
        } else {
            Ok(Retrieval::Found(passages))
        }
    }
}

// ============ Keyword ============

/// Case-insensitive line matching over the whole document text.
pub struct KeywordRetriever {
    document: Arc<str>,
}

impl KeywordRetriever {
    pub fn new(document: impl Into<Arc<str>>) -> Self {
        Self {
            document: document.into(),
        }
    }

    /// Load the document text from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = load_document_text(path)
            .map_err(|e| ClaimError::Retrieval(format!("cannot load document: {}", e)))?;
        Ok(Self::new(text))
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn retrieve(&self, term: &str) -> Result<Retrieval> {
        let term = term.trim();
        let context = keyword_context(&self.document, term)?;
        if context.is_empty() {
            Ok(Retrieval::NotFound(keyword_not_found(term)))
        } else {
            Ok(Retrieval::Context(context))
        }
    }
}

pub fn keyword_not_found(term: &str) -> String {
    format!("No information found for '{}' in the document.", term)
}

/// Every line containing `query` (case-insensitive) plus one line of context
/// either side, deduplicated in first-occurrence order and joined with `\n`.
///
/// Returns an empty string when nothing matches.
pub fn keyword_context(document: &str, query: &str) -> Result<String> {
    if document.trim().is_empty() {
        return Err(ClaimError::Retrieval("document is empty".into()));
    }
    if query.trim().is_empty() {
        return Err(ClaimError::Retrieval("empty search term".into()));
    }

    let needle = query.to_lowercase();
    let lines: Vec<&str> = document.lines().collect();
    let mut keep = vec![false; lines.len()];

    for (i, line) in lines.iter().enumerate() {
        if line.to_lowercase().contains(&needle) {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(lines.len() - 1);
            keep[lo..=hi].iter_mut().for_each(|k| *k = true);
        }
    }

    let mut seen = std::collections::HashSet::new();
    let picked: Vec<&str> = lines
        .iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(line, _)| *line)
        .filter(|line| seen.insert(*line))
        .collect();

    Ok(picked.join("\n"))
}

/// Build the retriever selected by `retrieval.mode`.
pub fn create_retriever(config: &Config, embedder: Arc<dyn Embedder>) -> anyhow::Result<Arc<dyn Retriever>> {
    match config.retrieval.mode.as_str() {
        "vector" => Ok(Arc::new(VectorRetriever::new(
            config.index.path.clone(),
            embedder,
            config.retrieval.top_k,
        ))),
        "keyword" => Ok(Arc::new(KeywordRetriever::from_path(
            &config.index.source_document,
        )?)),
        other => anyhow::bail!("Unknown retrieval mode: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[test]
    fn keyword_includes_neighbouring_lines() {
        let out = keyword_context("A\nB knee surgery\nC", "knee").unwrap();
        assert_eq!(out, "A\nB knee surgery\nC");
    }

    #[test]
    fn keyword_is_case_insensitive_and_deduplicates() {
        let doc = "intro\nKnee cover\nmiddle\nknee limits\noutro\nunrelated";
        let out = keyword_context(doc, "KNEE").unwrap();
        assert_eq!(out, "intro\nKnee cover\nmiddle\nknee limits\noutro");
    }

    #[test]
    fn keyword_match_on_first_and_last_line() {
        let out = keyword_context("knee\nx\ny\nknee", "knee").unwrap();
        assert_eq!(out, "knee\nx\ny");
    }

    #[test]
    fn keyword_empty_inputs_are_errors() {
        assert!(matches!(keyword_context("", "knee"), Err(ClaimError::Retrieval(_))));
        assert!(matches!(keyword_context("text", "  "), Err(ClaimError::Retrieval(_))));
    }

    #[tokio::test]
    async fn keyword_no_match_is_sentinel() {
        let r = KeywordRetriever::new("Dental is covered.");
        let out = r.retrieve("cardiac").await.unwrap();
        assert_eq!(
            out,
            Retrieval::NotFound("No information found for 'cardiac' in the document.".into())
        );
    }

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("knee") { vec![0.0, 1.0] } else { vec![1.0, 0.0] })
                .collect())
        }
    }

    #[tokio::test]
    async fn vector_missing_index_is_retrieval_error() {
        let tmp = TempDir::new().unwrap();
        let r = VectorRetriever::new(tmp.path().join("none.sqlite"), Arc::new(AxisEmbedder), 3);
        assert!(matches!(r.retrieve("knee").await, Err(ClaimError::Retrieval(_))));
    }

    #[tokio::test]
    async fn vector_unpopulated_index_is_retrieval_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.sqlite");
        PolicyIndex::create(&path).await.unwrap().close().await;
        let r = VectorRetriever::new(&path, Arc::new(AxisEmbedder), 3);
        let err = r.retrieve("knee").await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    struct WideEmbedder;

    #[async_trait]
    impl Embedder for WideEmbedder {
        fn model_name(&self) -> &str {
            "wide"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0, 1.0, 0.0]).collect())
        }
    }

    async fn axis_index(path: &Path, model: &str) {
        let index = PolicyIndex::create(path).await.unwrap();
        let chunks: Vec<Chunk> = ["dental", "knee surgery waiting period"]
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                id: format!("c{}", i),
                chunk_index: i as i64,
                source: "policy.pdf".into(),
                page: Some(1),
                text: t.to_string(),
                hash: String::new(),
            })
            .collect();
        index
            .replace_all(&chunks, &[vec![1.0, 0.0], vec![0.0, 1.0]], model, "fp")
            .await
            .unwrap();
        index.close().await;
    }

    #[tokio::test]
    async fn vector_index_from_other_model_is_retrieval_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("idx.sqlite");
        axis_index(&path, "axis").await;

        let r = VectorRetriever::new(&path, Arc::new(WideEmbedder), 3);
        let err = r.retrieve("knee").await.unwrap_err();
        assert!(matches!(err, ClaimError::Retrieval(_)));
        assert!(err.to_string().contains("--rebuild"));
    }

    #[tokio::test]
    async fn vector_dimension_mismatch_is_retrieval_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("idx.sqlite");
        axis_index(&path, "wide").await;

        let r = VectorRetriever::new(&path, Arc::new(WideEmbedder), 3);
        assert!(matches!(r.retrieve("knee").await, Err(ClaimError::Retrieval(_))));
    }

    #[tokio::test]
    async fn vector_returns_top_k() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("idx.sqlite");
        let index = PolicyIndex::create(&path).await.unwrap();
        let chunks: Vec<Chunk> = ["dental", "knee surgery waiting period", "cardiac"]
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                id: format!("c{}", i),
                chunk_index: i as i64,
                source: "policy.pdf".into(),
                page: Some(1),
                text: t.to_string(),
                hash: String::new(),
            })
            .collect();
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.1]];
        index.replace_all(&chunks, &vectors, "axis", "fp").await.unwrap();
        index.close().await;

        let r = VectorRetriever::new(&path, Arc::new(AxisEmbedder), 1);
        match r.retrieve("knee").await.unwrap() {
            Retrieval::Found(p) => {
                assert_eq!(p.len(), 1);
                assert_eq!(p[0].content, "knee surgery waiting period");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
