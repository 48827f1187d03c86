//! Question answering over a user's own documents.
//!
//! ```text
//! gate (indexed docs?) → embed query → query index (tenant filter)
//!     → assemble context → prompt → chat completion → count question
//! ```
//!
//! Users without an indexed document get [`NO_DOCUMENTS_MESSAGE`] and no
//! external call is made. Matches are kept only when they belong to the
//! caller and to one of the caller's `indexed` documents, so records left
//! behind by a failed or cancelled upload never reach the prompt.
//!
//! The question counter only moves after the model has produced an answer.
//! A failed counter update is logged and the answer is still returned.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{Config, RetrievalConfig};
use crate::context::assemble;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::llm::ChatModel;
use crate::models::TenantFilter;
use crate::services::{require_persistent_index, Services};
use crate::store::{DocumentStore, UsageStore};

/// Returned verbatim to users who have nothing indexed.
pub const NO_DOCUMENTS_MESSAGE: &str =
    "No documents found for this user. Please upload documents first.";

/// Answer the model falls back to when the context has nothing relevant.
pub const NO_DATA_ANSWER: &str = "I am unable to find data related to the query.";

/// Build the prompt sent to the chat model.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "Answer the following question based on the provided context.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {query}\n\
         \n\
         If the context does not contain relevant information, clearly state: '{NO_DATA_ANSWER}'"
    )
}

pub struct AnswerSynthesizer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
    documents: Arc<dyn DocumentStore>,
    usage: Arc<dyn UsageStore>,
    retrieval: RetrievalConfig,
}

impl AnswerSynthesizer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatModel>,
        documents: Arc<dyn DocumentStore>,
        usage: Arc<dyn UsageStore>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            chat,
            documents,
            usage,
            retrieval,
        }
    }

    /// Answer `query` using only chunks owned by `user_id`.
    pub async fn answer(&self, query: &str, user_id: i64) -> Result<String> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".into()));
        }
        if user_id <= 0 {
            return Err(RagError::InvalidInput(format!(
                "user_id must be positive, got {}",
                user_id
            )));
        }

        if self.documents.get_document_count(user_id).await? == 0 {
            debug!(user_id, "no indexed documents, skipping retrieval");
            return Ok(NO_DOCUMENTS_MESSAGE.to_string());
        }

        let vector = self.embedder.embed(query).await?;

        let filter = TenantFilter::user(user_id);
        let mut matches = self
            .index
            .query(&vector, self.retrieval.top_k, filter)
            .await?;

        let returned = matches.len();
        matches.retain(|m| filter.allows(&m.metadata));
        if matches.len() != returned {
            error!(
                user_id,
                dropped = returned - matches.len(),
                "vector index returned records owned by another user; dropped"
            );
        }

        if !matches.is_empty() {
            let indexed = self.documents.indexed_document_ids(user_id).await?;
            let owned = matches.len();
            matches.retain(|m| indexed.contains(&m.metadata.document_id));
            if matches.len() != owned {
                warn!(
                    user_id,
                    dropped = owned - matches.len(),
                    "dropped matches from documents that are not indexed"
                );
            }
        }

        let context = assemble(&matches, self.retrieval.max_context_chars);
        debug!(
            user_id,
            matches = matches.len(),
            context_chars = context.chars().count(),
            "context assembled"
        );

        let answer = self.chat.complete(&build_prompt(&context, query)).await?;

        if let Err(e) = self.usage.increment_questions_asked(user_id).await {
            error!(user_id, error = %e, "could not count question");
        }
        info!(user_id, matches = matches.len(), model = self.chat.model_name(), "question answered");

        Ok(answer)
    }
}

/// CLI entry point: answer `query` for `user_id` and print the answer.
pub async fn run_ask(config: &Config, user_id: i64, query: &str) -> anyhow::Result<()> {
    require_persistent_index(config)?;
    let services = Services::from_config(config).await?;
    let answer = services.answers.answer(query, user_id).await?;
    println!("{}", answer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt("X is a type of Y.\n", "What is X?");
        assert_eq!(
            prompt,
            "Answer the following question based on the provided context.\n\n\
             Context:\nX is a type of Y.\n\n\n\
             Question: What is X?\n\n\
             If the context does not contain relevant information, clearly state: \
             'I am unable to find data related to the query.'"
        );
    }

    #[test]
    fn test_prompt_with_empty_context() {
        let prompt = build_prompt("", "anything?");
        assert!(prompt.contains("Context:\n\n\nQuestion: anything?"));
    }
}
