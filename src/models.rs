//! Core data models used throughout IntelliClaim.
//!
//! These types represent the chunks, passages, search terms, and decisions
//! that flow through the indexing and query pipeline.

use serde::{Deserialize, Serialize};

/// A span of one page of the source document, as stored in the index.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub chunk_index: i64,
    /// Source identifier (the document path as given to the indexer).
    pub source: String,
    /// 1-based page number; `None` for documents without pages.
    pub page: Option<i64>,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// One page of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: Option<i64>,
    pub text: String,
}

/// A retrieved chunk with provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub content: String,
    pub source: String,
    pub page: Option<String>,
    pub score: f64,
}

/// Outcome of a retrieval: passages, or an explicit "nothing found" sentinel.
///
/// Retrieval failures are errors, never a `Retrieval` value.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Found(Vec<Passage>),
    /// Carries the fixed sentinel text shown to the synthesizer.
    NotFound(String),
    /// Preformatted context (keyword variant), already labelled.
    Context(String),
}

pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found in the document.";

impl Retrieval {
    /// Render as the text block handed to the synthesizer.
    pub fn render(&self) -> String {
        match self {
            Retrieval::Found(passages) => {
                let mut out = String::new();
                for p in passages {
                    out.push_str(&format!(
                        "Source: {}, Page: {}\n",
                        p.source,
                        p.page.as_deref().unwrap_or("N/A")
                    ));
                    out.push_str(&format!("Content: {}\n---\n", p.content));
                }
                out
            }
            Retrieval::NotFound(sentinel) => sentinel.clone(),
            Retrieval::Context(text) => text.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Retrieval::NotFound(_))
    }
}

/// Structured entities the Query Analyzer may extract. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEntities {
    pub age: Option<String>,
    pub location: Option<String>,
    pub medical_procedure: Option<String>,
    pub policy_age: Option<String>,
    pub additional_context: Option<String>,
}

impl QueryEntities {
    pub fn is_empty(&self) -> bool {
        self.age.is_none()
            && self.location.is_none()
            && self.medical_procedure.is_none()
            && self.policy_age.is_none()
            && self.additional_context.is_none()
    }

    /// `key: value` lines for the fields that are present.
    pub fn to_prompt_lines(&self) -> String {
        [
            ("Age", &self.age),
            ("Location", &self.location),
            ("Medical procedure", &self.medical_procedure),
            ("Policy age", &self.policy_age),
            ("Additional context", &self.additional_context),
        ]
        .iter()
        .filter_map(|(label, v)| v.as_ref().map(|v| format!("- {}: {}", label, v)))
        .collect::<Vec<_>>()
        .join("\n")
    }
}

/// Normalized search phrase produced by the Query Analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTerm {
    pub text: String,
    pub entities: QueryEntities,
    /// `true` when the analyzer fell back to the raw query.
    pub degraded: bool,
}

/// Coverage status token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoverageStatus {
    Approved,
    Denied,
    Conditional,
    /// The model did not emit a recognised status token.
    Unspecified,
}

impl std::fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoverageStatus::Approved => "APPROVED",
            CoverageStatus::Denied => "DENIED",
            CoverageStatus::Conditional => "CONDITIONAL",
            CoverageStatus::Unspecified => "UNSPECIFIED",
        };
        f.write_str(s)
    }
}

/// Final output of the Synthesizer.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageDecision {
    pub status: CoverageStatus,
    /// Full model narrative, returned to the caller as `final_answer`.
    pub text: String,
    pub reasoning: Option<String>,
    pub next_steps: Option<String>,
    pub timeline: Option<String>,
}

/// A `(agent, status, result)` progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub agent: String,
    pub status: String,
    pub result: String,
}

/// Wire shape returned for every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub final_answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResponse {
    pub fn success(final_answer: impl Into<String>) -> Self {
        Self {
            final_answer: final_answer.into(),
            status: Some("success".to_string()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, final_answer: impl Into<String>) -> Self {
        Self {
            final_answer: final_answer.into(),
            status: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}
