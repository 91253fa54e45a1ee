//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use intelliclaim::config::Config;
use intelliclaim::embedding::Embedder;
use intelliclaim::error::{ClaimError, Result};
use intelliclaim::extract::write_sample_policy;
use intelliclaim::llm::LanguageModel;
use intelliclaim::models::{ProgressEvent, Retrieval};
use intelliclaim::notify::Notifier;
use intelliclaim::retrieve::Retriever;

pub const KNEE_QUERY: &str = "Is knee surgery covered if I've had the policy for 3 months?";

/// Bag-of-words hashing embedder: texts sharing words score higher.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

const DIMS: usize = 64;

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-64"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
            % DIMS;
        v[bucket] += 1.0;
    }
    v
}

/// Plays both model roles, keyed on the system prompt.
///
/// The analyst returns `search_json`. The adjudicator denies when the
/// retrieved text mentions a 6-month waiting period.
pub struct FakeModel {
    pub search_json: String,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeModel {
    pub fn new(search_json: &str) -> Arc<Self> {
        Arc::new(Self {
            search_json: search_json.to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn knee() -> Arc<Self> {
        Self::new(r#"{"search_query": "knee surgery waiting period", "medical_procedure": "knee surgery", "policy_age": "3 months"}"#)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        if system.contains("Query Analyst") {
            return Ok(self.search_json.clone());
        }
        if prompt.contains("6-month waiting period") {
            Ok("Decision: DENIED\n\
                Reasoning: Knee surgery requires a 6-month waiting period from the policy start date. \
                The policy is only 3 months old.\n\
                Next steps: Reapply once the policy is 6 months old.\n\
                Timeline: Eligible in 3 months."
                .to_string())
        } else {
            Ok("Decision: CONDITIONAL\nReasoning: The policy text does not address this procedure.".to_string())
        }
    }
}

/// Counts calls and never finds anything.
pub struct CountingRetriever {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Retriever for CountingRetriever {
    fn name(&self) -> &str {
        "counting"
    }
    async fn retrieve(&self, _term: &str) -> Result<Retrieval> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Retrieval::NotFound("nothing".into()))
    }
}

/// Always fails delivery.
pub struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn emit(&self, _agent: &str, _status: &str, _result: &str) -> Result<()> {
        Err(ClaimError::Transport("socket closed".into()))
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn emit(&self, agent: &str, status: &str, result: &str) -> Result<()> {
        self.events.lock().unwrap().push(ProgressEvent {
            agent: agent.to_string(),
            status: status.to_string(),
            result: result.to_string(),
        });
        Ok(())
    }
}

/// Temp workspace holding the sample policy and an index location.
pub struct Workspace {
    pub dir: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("policy_document.txt");
        write_sample_policy(&doc).unwrap();

        let mut config = Config::minimal();
        config.index.path = dir.path().join("data").join("policy_index.sqlite");
        config.index.source_document = doc;
        Self { dir, config }
    }

    pub fn document(&self) -> PathBuf {
        self.config.index.source_document.clone()
    }
}
