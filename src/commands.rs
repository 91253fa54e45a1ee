//! CLI command implementations.
//!
//! Each `run_*` function backs one `intelliclaim` subcommand. Startup
//! failures (bad config, missing API key, failed indexing) surface here as
//! `anyhow` errors so the process exits non-zero before doing any work.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract::write_sample_policy;
use crate::index::{build_index, IndexSummary, OnExisting};
use crate::llm::ChatCompletionsClient;
use crate::models::Retrieval;
use crate::notify::{BroadcastNotifier, LogNotifier};
use crate::pipeline::PipelineController;
use crate::retrieve::create_retriever;
use crate::server::{run_server, AppState};

/// `intelliclaim index [--document PATH] [--rebuild]`
pub async fn run_index(config: &Config, document: Option<PathBuf>, rebuild: bool) -> Result<()> {
    let source = document.unwrap_or_else(|| config.index.source_document.clone());
    let on_existing = if rebuild {
        OnExisting::Rebuild
    } else {
        OnExisting::from_config(&config.index.on_existing)
    };

    let embedder = indexing_embedder(config)?;
    let summary = build_index(config, embedder.as_ref(), &source, on_existing).await?;
    print_summary(&summary);
    Ok(())
}

/// `intelliclaim ask "<query>"`
pub async fn run_ask(config: &Config, query: &str) -> Result<()> {
    let llm = Arc::new(ChatCompletionsClient::from_config(&config.llm)?);
    let embedder = create_embedder(&config.embedding)?;
    let retriever = create_retriever(config, embedder)?;

    let controller = PipelineController::new(llm, retriever, Arc::new(LogNotifier), &config.pipeline);
    let response = controller.run(query).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// `intelliclaim search "<term>" [--k N]`
pub async fn run_search(config: &Config, term: &str, k: Option<usize>) -> Result<()> {
    let mut config = config.clone();
    if let Some(k) = k {
        if k == 0 {
            bail!("--k must be >= 1");
        }
        config.retrieval.top_k = k;
    }

    let embedder = create_embedder(&config.embedding)?;
    let retriever = create_retriever(&config, embedder)?;

    match retriever.retrieve(term).await? {
        Retrieval::Found(passages) => {
            for (i, p) in passages.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (page {})",
                    i + 1,
                    p.score,
                    p.source,
                    p.page.as_deref().unwrap_or("N/A")
                );
                println!("    {}", p.content.replace('\n', "\n    "));
                println!();
            }
        }
        other => println!("{}", other.render()),
    }
    Ok(())
}

/// `intelliclaim serve [--document PATH]`
///
/// Indexes first (vector mode), then binds. Any startup failure aborts
/// before the listener opens.
pub async fn run_serve(config: &Config, document: Option<PathBuf>) -> Result<()> {
    let mut config = config.clone();
    if let Some(doc) = document {
        config.index.source_document = doc;
    }

    let llm = Arc::new(ChatCompletionsClient::from_config(&config.llm)?);
    let embedder = create_embedder(&config.embedding)?;

    if config.retrieval.mode == "vector" {
        let summary = build_index(
            &config,
            embedder.as_ref(),
            &config.index.source_document,
            OnExisting::from_config(&config.index.on_existing),
        )
        .await?;
        print_summary(&summary);
    }

    let retriever = create_retriever(&config, embedder)?;
    let progress = BroadcastNotifier::new();
    let controller = Arc::new(PipelineController::new(
        llm,
        retriever,
        Arc::new(progress.clone()),
        &config.pipeline,
    ));

    run_server(&config.server.bind, AppState::new(controller, progress)).await
}

/// `intelliclaim seed [PATH]`
///
/// Without a path, writes next to `index.source_document`, swapping a `.pdf`
/// extension for `.txt`.
pub fn run_seed(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => {
            let doc = &config.index.source_document;
            if is_pdf_path(doc) {
                let txt = doc.with_extension("txt");
                println!(
                    "Note: set index.source_document = \"{}\" to index the sample.",
                    txt.display()
                );
                txt
            } else {
                doc.clone()
            }
        }
    };
    if is_pdf_path(&path) {
        bail!(
            "seed writes plain text; choose a .txt path (got {})",
            path.display()
        );
    }
    write_sample_policy(&path)?;
    println!("Wrote sample policy to {}", path.display());
    Ok(())
}

fn indexing_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    if !config.embedding.is_enabled() {
        bail!("Indexing requires embeddings. Set [embedding] provider in config.");
    }
    create_embedder(&config.embedding)
}

fn print_summary(summary: &IndexSummary) {
    let verb = if summary.rebuilt { "Indexed" } else { "Reused" };
    println!(
        "{} {} chunks at {}",
        verb,
        summary.chunks,
        summary.path.display()
    );
}

fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}
