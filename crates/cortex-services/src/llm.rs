//! Answer-generation capability.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::ServiceError;

#[async_trait]
pub trait Llm: Send + Sync {
    /// Produce an answer to `query` grounded in the retrieved `contexts`.
    async fn generate_answer(&self, query: &str, contexts: &[String])
        -> Result<String, ServiceError>;
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// Echoes the retrieved contexts. Retrieval correctness is what the pipeline
/// tests assert; generation quality is a client swap.
#[derive(Default)]
pub struct MockLlm;

impl MockLlm {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Llm for MockLlm {
    async fn generate_answer(
        &self,
        query: &str,
        contexts: &[String],
    ) -> Result<String, ServiceError> {
        let context_str = contexts
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!(
            "This is a generated answer for '{query}' based on the following context:\n{context_str}"
        ))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat client
// ---------------------------------------------------------------------------

pub struct OpenAiLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiLlm {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Llm for OpenAiLlm {
    async fn generate_answer(
        &self,
        query: &str,
        contexts: &[String],
    ) -> Result<String, ServiceError> {
        let context_block = contexts.join("\n---\n");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": "Answer the question using only the provided context."
                    },
                    {
                        "role": "user",
                        "content": format!("Context:\n{context_block}\n\nQuestion: {query}")
                    }
                ],
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Llm(format!("transport: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::Llm(format!("api status {}", resp.status())));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Llm(format!("decode: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ServiceError::Llm("empty response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_answer_quotes_every_context() {
        let llm = MockLlm::new();
        let contexts = vec!["alpha".to_string(), "beta".to_string()];
        let answer = llm.generate_answer("what?", &contexts).await.unwrap();
        assert!(answer.contains("what?"));
        assert!(answer.contains("- alpha"));
        assert!(answer.contains("- beta"));
    }
}
