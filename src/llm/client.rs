use crate::config::Config;
use crate::llm::{ChatMessage, ChatOptions, Provider, Role};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs, Stop,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// OpenAI-compatible client for a locally hosted inference server. Chat and
/// embeddings may point at different endpoints/models.
pub struct LlmClient {
    chat_client: Client<OpenAIConfig>,
    embedding_client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let mut chat_config = OpenAIConfig::new().with_api_base(&config.llm_url);
        if let Some(key) = &config.llm_api_key {
            chat_config = chat_config.with_api_key(key);
        } else {
            chat_config = chat_config.with_api_key("unused");
        }

        let mut embedding_config = OpenAIConfig::new().with_api_base(&config.embedding_url);
        if let Some(key) = &config.embedding_api_key {
            embedding_config = embedding_config.with_api_key(key);
        } else {
            embedding_config = embedding_config.with_api_key("unused");
        }

        Self {
            chat_client: Client::with_config(chat_config),
            embedding_client: Client::with_config(embedding_config),
            chat_model: config.llm_model.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }

    /// Model names reported by the inference server. Doubles as the health
    /// check: an unreachable server yields an error.
    pub async fn available_models(&self) -> anyhow::Result<Vec<String>> {
        let response = self.chat_client.models().list().await?;
        Ok(response.data.into_iter().map(|m| m.id).collect())
    }

    pub async fn check_health(&self) -> bool {
        match self.available_models().await {
            Ok(models) => {
                info!("Inference server healthy ({} models)", models.len());
                true
            }
            Err(e) => {
                error!("Inference server health check failed: {:#}", e);
                false
            }
        }
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> anyhow::Result<async_openai::types::CreateChatCompletionRequest> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.chat_model)
            .messages(to_request_messages(messages)?);
        if let Some(temperature) = options.temperature {
            builder.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            builder.max_tokens(max_tokens);
        }
        if !options.stop.is_empty() {
            builder.stop(Stop::StringArray(options.stop.clone()));
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl Provider for LlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> anyhow::Result<String> {
        let request = self.build_request(messages, options)?;
        debug!("Chat request: model={}, {} messages", self.chat_model, messages.len());
        let response = self.chat_client.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        Ok(content)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        tx: mpsc::Sender<String>,
    ) -> anyhow::Result<()> {
        let request = self.build_request(messages, options)?;
        let mut stream = self.chat_client.chat().create_stream(request).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() && tx.send(content.clone()).await.is_err() {
                        // Receiver hung up; stop pulling tokens.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(text)
            .build()?;
        let response = self.embedding_client.embeddings().create(request).await?;
        let embedding = response
            .data
            .first()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))?
            .embedding
            .clone();
        Ok(embedding)
    }
}

fn to_request_messages(
    messages: &[ChatMessage],
) -> anyhow::Result<Vec<ChatCompletionRequestMessage>> {
    messages
        .iter()
        .map(|m| {
            Ok(match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
            })
        })
        .collect()
}
