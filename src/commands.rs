use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::StudyError;
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::extract::{FileExtractor, SourceFormat, TextExtractor};
use crate::generation::{self, OllamaGenerator};
use crate::index::VectorIndex;
use crate::retriever::Retriever;

/// Open the persisted index described by `config`
#[inline]
pub fn open_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let index = VectorIndex::open(
        config.index_path(),
        config.embedding_dimension(),
        config.retrieval.metric,
    )
    .context("Failed to open vector index")?;
    Ok(Arc::new(index))
}

fn open_retriever(config: &Config) -> Result<(Retriever, OllamaClient)> {
    let client = OllamaClient::new(&config.ollama)?;
    let index = open_index(config)?;
    let retriever = Retriever::from_config(config, index, Arc::new(client.clone()))?;
    Ok((retriever, client))
}

/// Supported source files under `path`, skipping pre-extracted companions
#[inline]
pub fn collect_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {}", path.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            files.extend(collect_files(&entry)?);
        } else if FileExtractor::is_companion(&entry) {
            continue;
        } else if SourceFormat::from_path(&entry).is_some() {
            files.push(entry);
        } else {
            info!("Skipping unsupported file {}", entry.display());
        }
    }

    Ok(files)
}

/// Extract, chunk, embed and store every supported file under `paths`
#[inline]
pub async fn ingest_paths(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let (retriever, _) = open_retriever(config)?;

    let mut files = Vec::new();
    for path in paths {
        files.extend(collect_files(path)?);
    }

    if files.is_empty() {
        println!("No supported files found (.txt, .md, .json, .pdf, .ppt, .pptx).");
        return Ok(());
    }

    let bar = ProgressBar::new(files.len() as u64).with_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] Ingesting {msg}")
            .context("Invalid progress template")?,
    );

    let mut ingested = 0;
    let mut failed = 0;
    let mut total_chunks = 0;

    for file in &files {
        bar.set_message(file.display().to_string());

        let extracted = match FileExtractor.extract(file) {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                bar.println(format!("Skipped {}: {}", file.display(), e));
                failed += 1;
                bar.inc(1);
                continue;
            }
        };

        match retriever.ingest(&extracted).await {
            Ok(document) => {
                ingested += 1;
                total_chunks += document.chunks.len();
                bar.println(format!(
                    "Indexed {} ({} chunks, ID: {})",
                    document.meta.filename,
                    document.chunks.len(),
                    document.id()
                ));
            }
            Err(e) if e.is_fatal() => {
                bar.abandon();
                return Err(e.into());
            }
            Err(e) => {
                error!("Failed to ingest {}: {}", file.display(), e);
                bar.println(format!("Failed {}: {}", file.display(), e));
                failed += 1;
            }
        }
        bar.inc(1);
    }

    bar.finish_and_clear();
    println!("Ingestion complete!");
    println!("  Documents indexed: {}", ingested);
    println!("  Chunks stored: {}", total_chunks);
    println!("  Failed: {}", failed);
    Ok(())
}

/// List every stored document
#[inline]
pub fn list_documents(config: &Config) -> Result<()> {
    let index = open_index(config)?;
    let documents = index.documents();

    if documents.is_empty() {
        println!("No documents have been ingested yet.");
        println!("Use 'study-rag ingest <path>' to add study materials.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();
    for summary in &documents {
        let meta = &summary.document;
        println!("{} (ID: {})", meta.filename, meta.id);
        println!("   Format: {}", meta.format);
        println!(
            "   Chunks: {} ({} tokens)",
            summary.chunk_count, summary.total_tokens
        );
        println!(
            "   Ingested: {}",
            meta.ingested_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }
    Ok(())
}

/// Delete a document by ID, or every document with a matching filename
#[inline]
pub fn delete_document(config: &Config, identifier: &str) -> Result<()> {
    let index = open_index(config)?;
    let (documents, chunks) = delete_matching(&index, identifier)?;

    if documents == 0 {
        println!("No document found matching '{}'", identifier);
    } else {
        println!(
            "Deleted {} document(s), {} chunks removed",
            documents, chunks
        );
    }
    Ok(())
}

/// Documents and chunks actually removed for `identifier`
fn delete_matching(index: &VectorIndex, identifier: &str) -> Result<(usize, usize)> {
    let targets: Vec<Uuid> = match Uuid::parse_str(identifier) {
        Ok(id) => vec![id],
        Err(_) => index
            .documents()
            .into_iter()
            .filter(|s| s.document.filename == identifier)
            .map(|s| s.document.id)
            .collect(),
    };

    let mut documents = 0;
    let mut chunks = 0;
    for id in targets {
        let removed = index.delete(id)?;
        if removed > 0 {
            documents += 1;
            chunks += removed;
        }
    }
    Ok((documents, chunks))
}

/// Print the passages retrieved for `query`
#[inline]
pub async fn search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let (retriever, _) = open_retriever(config)?;
    let k = limit.unwrap_or(config.retrieval.top_k);

    let result = retriever.retrieve(query, k).await?;
    if result.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for passage in &result.passages {
        let location = match &passage.section {
            Some(section) => format!(" ({})", section),
            None => String::new(),
        };
        println!(
            "Result {}: {}{} [score {:.3}]",
            passage.rank, passage.filename, location, passage.score
        );
        println!(
            "   chunks {:?}, bytes {}..{}",
            passage.chunk_indices, passage.start, passage.end
        );
        println!("   {}", passage.text.trim());
        println!();
    }
    Ok(())
}

/// Answer `question` from the stored documents and list the sources
#[inline]
pub async fn ask(
    config: &Config,
    question: &str,
    limit: Option<usize>,
    max_context_tokens: Option<usize>,
) -> Result<()> {
    let (retriever, client) = open_retriever(config)?;
    let generator = OllamaGenerator::new(client, config.retry.policy());

    let answer = generation::ask(
        &retriever,
        &generator,
        question,
        limit.unwrap_or(config.retrieval.top_k),
        max_context_tokens.unwrap_or(config.retrieval.max_context_tokens),
    )
    .await?;

    println!("{}", answer.text);
    if !answer.context.is_empty() {
        println!();
        print!("{}", answer.context.render_sources());
    }
    if answer.context.omitted > 0 {
        println!(
            "({} further passages did not fit the context budget)",
            answer.context.omitted
        );
    }
    Ok(())
}

/// Report Ollama health and index statistics
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("Study RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("Ollama:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let check = client.clone();
            let health = tokio::task::spawn_blocking(move || check.health_check())
                .await
                .context("Health check task failed")?;
            match health {
                Ok(()) => println!("   Connected to {}", config.ollama.ollama_url()?),
                Err(e) => println!("   Unhealthy: {}", e),
            }
            println!("   Embedding model: {}", client.model());
            println!("   Generation model: {}", client.generation_model());
        }
        Err(e) => println!("   Failed to create client: {}", e),
    }
    println!();

    println!("Index:");
    println!("   Path: {}", config.index_path().display());
    match open_index(config) {
        Ok(index) => {
            let documents = index.documents();
            println!("   Documents: {}", documents.len());
            println!("   Chunks: {}", index.len());
            println!("   Dimension: {}", index.dimension());
            println!("   Metric: {}", index.metric());
        }
        Err(e) => match e.downcast_ref::<StudyError>() {
            Some(StudyError::IndexCorruption { .. }) => {
                println!("   Corrupted, refusing to serve queries: {}", e);
            }
            _ => println!("   Failed to open: {:#}", e),
        },
    }
    println!();

    println!("Retrieval:");
    println!("   Top k: {}", config.retrieval.top_k);
    println!(
        "   Context budget: {} tokens",
        config.retrieval.max_context_tokens
    );
    println!(
        "   Chunking: {} tokens, {} overlap",
        config.chunking.max_tokens, config.chunking.overlap_tokens
    );
    Ok(())
}
