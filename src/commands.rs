use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::RetrievedPassage;
use crate::embeddings::OllamaClient;
use crate::engine::RagEngine;
use crate::mcp::{McpServer, register_tools};

const SERVER_INSTRUCTIONS: &str = "Use list_collections to see what has been ingested, \
query_collection to find relevant passages and answer_question for answers grounded \
only in those passages.";

async fn open_engine(config_dir: &Path) -> Result<RagEngine> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    RagEngine::open(config)
        .await
        .context("Failed to open retrieval engine")
}

/// Chunk, embed and store each document, continuing past failures
#[inline]
pub async fn ingest(config_dir: &Path, paths: &[PathBuf], collection: Option<&str>) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let collection = collection.unwrap_or_else(|| engine.default_collection());
    let indexer = engine.indexer();

    info!("Ingesting {} document(s) into '{}'", paths.len(), collection);

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(paths.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Ingesting {msg}")
                .context("Invalid progress template")?,
        )
    } else {
        ProgressBar::hidden()
    };

    let mut failed = 0;
    let mut chunks = 0;
    for path in paths {
        bar.set_message(path.display().to_string());
        match indexer.ingest_path(collection, path).await {
            Ok(stats) => {
                chunks += stats.chunks_created;
                bar.println(format!(
                    "{} {} ({} pages, {} chunks)",
                    style("✓").green(),
                    stats.source,
                    stats.pages,
                    stats.chunks_created
                ));
            }
            Err(e) => {
                failed += 1;
                error!("Failed to ingest {}: {}", path.display(), e);
                bar.println(format!("{} {}: {}", style("✗").red(), path.display(), e));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!(
        "Ingested {} of {} document(s) into '{}' ({} chunks)",
        paths.len() - failed,
        paths.len(),
        style(collection).cyan(),
        chunks
    );

    if failed > 0 {
        bail!("{} document(s) failed to ingest", failed);
    }
    Ok(())
}

/// List collections with their record counts
#[inline]
pub async fn list_collections(config_dir: &Path) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let store = engine.store();
    let collections = store
        .list_collections()
        .await
        .context("Failed to list collections")?;

    if collections.is_empty() {
        println!("No collections have been created yet.");
        println!("Use 'docs-rag ingest <path>' to add documents.");
        return Ok(());
    }

    println!("Collections ({} total):", collections.len());
    for name in &collections {
        match store.count(name).await {
            Ok(count) => println!("  {} ({} passages)", style(name).cyan(), count),
            Err(e) => println!("  {} ({})", style(name).cyan(), style(e).red()),
        }
    }

    Ok(())
}

/// Print the passages most similar to a query
#[inline]
pub async fn query(
    config_dir: &Path,
    query: &str,
    collection: Option<&str>,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let collection = collection.unwrap_or_else(|| engine.default_collection());

    let passages = engine
        .retriever(collection)
        .retrieve(query, k)
        .await
        .with_context(|| format!("Failed to query collection '{}'", collection))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&passages)?);
        return Ok(());
    }

    if passages.is_empty() {
        println!("No passages found in '{}'.", collection);
        return Ok(());
    }
    for (rank, passage) in passages.iter().enumerate() {
        print_passage(rank + 1, passage);
    }
    Ok(())
}

/// Answer a question from retrieved passages
#[inline]
pub async fn ask(
    config_dir: &Path,
    question: &str,
    collection: Option<&str>,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let collection = collection.unwrap_or_else(|| engine.default_collection());

    let orchestrator = engine.orchestrator(collection)?;
    let k = k.unwrap_or_else(|| orchestrator.top_k());
    let answer = orchestrator
        .answer_with_k(question, k)
        .await
        .context("Failed to answer question")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.answer_text.trim());
    if !answer.retrieved_context.is_empty() {
        println!();
        println!("{}", style("Sources:").bold().yellow());
        for (rank, passage) in answer.retrieved_context.iter().enumerate() {
            print_passage(rank + 1, passage);
        }
    }
    Ok(())
}

/// Drop a collection and all of its passages
#[inline]
pub async fn drop_collection(config_dir: &Path, collection: &str, assume_yes: bool) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let store = engine.store();
    let count = store
        .count(collection)
        .await
        .with_context(|| format!("Collection not found: {}", collection))?;

    println!(
        "Collection {} holds {} passages.",
        style(collection).cyan(),
        count
    );

    if !assume_yes
        && !Confirm::new()
            .with_prompt("Drop this collection? This action cannot be undone")
            .default(false)
            .interact()?
    {
        println!("Cancelled.");
        return Ok(());
    }

    store.drop_collection(collection).await?;
    println!("{} Dropped collection {}", style("✓").green(), collection);
    Ok(())
}

/// Serve the retrieval tools over MCP on stdio until EOF or Ctrl+C
///
/// Stdout carries the protocol, so all status output goes to stderr.
#[inline]
pub async fn serve_mcp(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    match client.health_check() {
        Ok(()) => info!(
            "Ollama ready at {} ({} / {})",
            client.base_url(),
            config.ollama.embedding_model,
            config.ollama.generation_model
        ),
        Err(e) => {
            warn!("Ollama is not ready: {:#}", e);
            eprintln!(
                "{}",
                style("⚠ Ollama is not ready; tool calls may fail until it is.").yellow()
            );
        }
    }

    let engine = Arc::new(
        RagEngine::open(config)
            .await
            .context("Failed to open retrieval engine")?,
    );

    let server = McpServer::new(
        "docs-rag".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    )
    .with_instructions(SERVER_INSTRUCTIONS);
    register_tools(&server, &engine).await;

    eprintln!(
        "{}",
        style("MCP server listening on stdio. Press Ctrl+C to stop.").green()
    );

    tokio::select! {
        result = server.serve_stdio() => {
            result.context("MCP server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Received interrupt signal, shutting down...");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn print_passage(rank: usize, passage: &RetrievedPassage) {
    println!(
        "{} {} (page {}, chunk {}) score {:.3}",
        style(format!("[{}]", rank)).bold(),
        style(&passage.metadata.source).cyan(),
        passage.metadata.page_index + 1,
        passage.metadata.chunk_index,
        passage.score
    );
    println!("    {}", passage.text.replace('\n', "\n    "));
}
