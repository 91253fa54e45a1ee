//! The pipeline controller.
//!
//! Runs one query through three strictly sequential stages:
//!
//! ```text
//! Idle → AnalyzingQuery → Retrieving → Synthesizing → Complete
//!            │                │              │
//!            └────────────────┴──────────────┴──→ Failed
//! ```
//!
//! Every transition is logged and reported to the [`Notifier`]. Each stage
//! runs under `pipeline.stage_timeout_secs`. [`PipelineController::run`]
//! always returns a [`PipelineResponse`]: the success shape, the validation
//! shape, or the generic apology. It never returns an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{AnalysisFallback, QueryAnalyzer, Synthesizer};
use crate::config::PipelineConfig;
use crate::error::{ClaimError, Result};
use crate::llm::LanguageModel;
use crate::models::{CoverageDecision, PipelineResponse, Retrieval};
use crate::notify::Notifier;
use crate::retrieve::Retriever;

pub const ORCHESTRATOR: &str = "Orchestrator";
pub const QUERY_AGENT: &str = "Query Understanding Agent";
pub const RETRIEVAL_AGENT: &str = "Document Retrieval Specialist";
pub const DECISION_AGENT: &str = "Decision Making Agent";
pub const WORKFLOW_COMPLETE: &str = "Workflow Complete";

pub const EMPTY_QUERY_ERROR: &str = "Empty query provided";
pub const EMPTY_QUERY_ANSWER: &str = "Please provide a valid insurance query.";
pub const APOLOGY: &str = "An error occurred while processing your query. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    AnalyzingQuery,
    Retrieving,
    Synthesizing,
    Complete,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::AnalyzingQuery => "analyzing_query",
            PipelineState::Retrieving => "retrieving",
            PipelineState::Synthesizing => "synthesizing",
            PipelineState::Complete => "complete",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Drives a query through analysis, retrieval, and synthesis.
///
/// Holds only shared, read-only collaborators, so one controller serves any
/// number of concurrent runs.
pub struct PipelineController {
    analyzer: QueryAnalyzer,
    synthesizer: Synthesizer,
    retriever: Arc<dyn Retriever>,
    notifier: Arc<dyn Notifier>,
    stage_timeout: Duration,
    fallback: AnalysisFallback,
}

impl PipelineController {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        notifier: Arc<dyn Notifier>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(llm.clone()),
            synthesizer: Synthesizer::new(llm),
            retriever,
            notifier,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
            fallback: AnalysisFallback::from_config(&config.analysis_fallback),
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub async fn run(&self, query: &str) -> PipelineResponse {
        let query = query.trim();
        if query.is_empty() {
            tracing::warn!("rejected empty query");
            self.transition(
                PipelineState::Idle,
                PipelineState::Failed,
                ORCHESTRATOR,
                "error",
                EMPTY_QUERY_ERROR,
            );
            return PipelineResponse::failure(EMPTY_QUERY_ERROR, EMPTY_QUERY_ANSWER);
        }

        tracing::info!(query, "orchestrator starting workflow");
        self.transition(
            PipelineState::Idle,
            PipelineState::AnalyzingQuery,
            ORCHESTRATOR,
            "processing",
            "Query received. Starting multi-agent RAG workflow...",
        );

        match self.execute(query).await {
            Ok(decision) => {
                self.transition(
                    PipelineState::Synthesizing,
                    PipelineState::Complete,
                    WORKFLOW_COMPLETE,
                    "complete",
                    &decision.text,
                );
                PipelineResponse::success(decision.text)
            }
            Err(err) => {
                let message = format!("Error in orchestrator workflow: {}", err);
                tracing::error!(kind = err.kind(), error = %err, "workflow failed");
                self.notify(ORCHESTRATOR, "error", &message);
                tracing::info!(to = %PipelineState::Failed, "state transition");
                PipelineResponse::failure(message, APOLOGY)
            }
        }
    }

    async fn execute(&self, query: &str) -> Result<CoverageDecision> {
        let term = match self
            .bounded("query analysis", ClaimError::Analysis, self.analyzer.analyze(query))
            .await
        {
            Ok(term) => term,
            Err(err) => {
                tracing::warn!(error = %err, "query analysis failed");
                self.fallback.recover(query, err)?
            }
        };

        if term.degraded {
            tracing::warn!(term = %term.text, "analysis degraded, searching with the raw query");
            self.transition(
                PipelineState::AnalyzingQuery,
                PipelineState::Retrieving,
                QUERY_AGENT,
                "degraded",
                &format!("Analysis unavailable. Searching with the original query: {}", term.text),
            );
        } else {
            self.transition(
                PipelineState::AnalyzingQuery,
                PipelineState::Retrieving,
                QUERY_AGENT,
                "complete",
                &format!("Search term: {}", term.text),
            );
        }

        let retrieval = self
            .bounded("retrieval", ClaimError::Retrieval, self.retriever.retrieve(&term.text))
            .await?;
        self.transition(
            PipelineState::Retrieving,
            PipelineState::Synthesizing,
            RETRIEVAL_AGENT,
            "complete",
            &retrieval_summary(&retrieval),
        );

        let decision = self
            .bounded(
                "synthesis",
                ClaimError::Synthesis,
                self.synthesizer.synthesize(query, &term, &retrieval),
            )
            .await?;
        self.notify(
            DECISION_AGENT,
            "complete",
            &format!("Decision: {}", decision.status),
        );
        tracing::info!(status = %decision.status, "coverage decision reached");

        Ok(decision)
    }

    async fn bounded<T, F>(&self, stage: &str, wrap: fn(String) -> ClaimError, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(wrap(format!(
                "{} timed out after {}s",
                stage,
                self.stage_timeout.as_secs_f64()
            ))),
        }
    }

    fn transition(&self, from: PipelineState, to: PipelineState, agent: &str, status: &str, result: &str) {
        tracing::info!(%from, %to, agent, "state transition");
        self.notify(agent, status, result);
    }

    fn notify(&self, agent: &str, status: &str, result: &str) {
        if let Err(err) = self.notifier.emit(agent, status, result) {
            tracing::warn!(agent, error = %err, "progress notification dropped");
        }
    }
}

fn retrieval_summary(retrieval: &Retrieval) -> String {
    match retrieval {
        Retrieval::Found(passages) => format!("Found {} relevant policy passage(s).", passages.len()),
        Retrieval::Context(_) => "Found matching policy lines.".to_string(),
        Retrieval::NotFound(sentinel) => sentinel.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Passage, NO_RELEVANT_INFORMATION};
    use crate::models::ProgressEvent;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self::default()
        }

        fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn emit(&self, agent: &str, status: &str, result: &str) -> crate::error::Result<()> {
            self.events.lock().unwrap().push(ProgressEvent {
                agent: agent.to_string(),
                status: status.to_string(),
                result: result.to_string(),
            });
            Ok(())
        }
    }

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _system: &str, _prompt: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{\"search_query\": \"late\"}".into())
        }
    }

    struct FixedRetriever(Retrieval);

    #[async_trait]
    impl Retriever for FixedRetriever {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn retrieve(&self, _term: &str) -> Result<Retrieval> {
            Ok(self.0.clone())
        }
    }

    fn found() -> Retrieval {
        Retrieval::Found(vec![Passage {
            content: "knee surgery requires a 6-month waiting period".into(),
            source: "policy.pdf".into(),
            page: Some("1".into()),
            score: 0.9,
        }])
    }

    #[test]
    fn state_display() {
        assert_eq!(PipelineState::AnalyzingQuery.to_string(), "analyzing_query");
        assert_eq!(PipelineState::Failed.to_string(), "failed");
    }

    #[test]
    fn summary_reports_sentinel() {
        let nf = Retrieval::NotFound(NO_RELEVANT_INFORMATION.into());
        assert_eq!(retrieval_summary(&nf), NO_RELEVANT_INFORMATION);
        assert!(retrieval_summary(&found()).starts_with("Found 1"));
    }

    #[tokio::test]
    async fn stage_timeout_becomes_apology() {
        let notifier = Arc::new(RecordingNotifier::new());
        let controller = PipelineController::new(
            Arc::new(SlowModel),
            Arc::new(FixedRetriever(found())),
            notifier.clone(),
            &PipelineConfig::default(),
        )
        .with_stage_timeout(Duration::from_millis(20));

        let resp = controller.run("Is knee surgery covered?").await;
        assert_eq!(resp.final_answer, APOLOGY);
        let error = resp.error.unwrap();
        assert!(error.starts_with("Error in orchestrator workflow: Analysis error"));
        assert!(error.contains("timed out"));

        let last = notifier.events().pop().unwrap();
        assert_eq!(last.agent, ORCHESTRATOR);
        assert_eq!(last.status, "error");
    }

    #[tokio::test]
    async fn timeout_with_raw_query_fallback_degrades() {
        let notifier = Arc::new(RecordingNotifier::new());
        let config = PipelineConfig {
            analysis_fallback: "raw_query".into(),
            ..Default::default()
        };
        let controller = PipelineController::new(
            Arc::new(SlowModel),
            Arc::new(FixedRetriever(found())),
            notifier.clone(),
            &config,
        )
        .with_stage_timeout(Duration::from_millis(20));

        // Synthesis also times out, but only after analysis degraded.
        let resp = controller.run("knee surgery?").await;
        assert!(!resp.is_success());
        let events = notifier.events();
        assert!(events
            .iter()
            .any(|e| e.agent == QUERY_AGENT && e.status == "degraded" && e.result.ends_with("knee surgery?")));
        assert!(resp.error.unwrap().contains("Synthesis error"));
    }
}
