// Answer generation module
// Turns an assembled context block and a question into an answer


use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::{self, AssembledContext};
use crate::embeddings::{EmbedError, OllamaClient, RetryPolicy};
use crate::retriever::Retriever;
use crate::{Result, StudyError};

/// Reply used when retrieval finds nothing to ground an answer on
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find anything relevant to that question in your study materials.";

/// Produces an answer from a context block
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, context_block: &str, question: &str) -> Result<String>;
}

/// Instruction wrapped around the context block and question
#[inline]
pub fn build_prompt(context_block: &str, question: &str) -> String {
    format!(
        "You are a helpful study assistant. Answer the question using only the \
         reference documents below. Cite the passages you rely on by their \
         bracketed numbers, e.g. [1].\n\n\
         REFERENCE DOCUMENTS:\n{}\n\n\
         QUESTION: {}\n\n\
         Give a comprehensive but concise answer.",
        context_block, question
    )
}

/// [`AnswerGenerator`] backed by an Ollama generation model
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    retry: RetryPolicy,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(client: OllamaClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    #[inline]
    async fn generate(&self, context_block: &str, question: &str) -> Result<String> {
        let prompt = build_prompt(context_block, question);
        debug!(
            "Generating answer with {} ({} prompt bytes)",
            self.client.generation_model(),
            prompt.len()
        );

        self.retry
            .run("answer generation", || {
                let client = self.client.clone();
                let prompt = prompt.clone();
                // a cancelled caller leaves this running until the client timeout
                async move {
                    tokio::task::spawn_blocking(move || client.generate_blocking(&prompt))
                        .await
                        .map_err(|e| {
                            EmbedError::Permanent(format!("Generation task failed: {}", e))
                        })?
                }
            })
            .await
            .map_err(|e| StudyError::Generation(e.to_string()))
    }
}

/// Answer text together with the context it was generated from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub context: AssembledContext,
}

/// Retrieve, assemble and generate in one step
#[inline]
pub async fn ask(
    retriever: &Retriever,
    generator: &dyn AnswerGenerator,
    question: &str,
    top_k: usize,
    max_context_tokens: usize,
) -> Result<Answer> {
    let result = retriever.retrieve(question, top_k).await?;
    let context = context::assemble(&result, max_context_tokens);

    if context.is_empty() {
        info!("No context found for question, skipping generation");
        return Ok(Answer {
            question: question.to_string(),
            text: NO_CONTEXT_ANSWER.to_string(),
            context,
        });
    }

    let text = generator.generate(&context.text, question).await?;
    info!(
        "Answered with {} cited passages ({} context tokens)",
        context.citations.len(),
        context.token_count
    );

    Ok(Answer {
        question: question.to_string(),
        text: text.trim().to_string(),
        context,
    })
}
