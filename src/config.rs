use dotenvy::dotenv;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub llm_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub database_url: String,
    /// Administrator identity as "platform:user_id". Admin-only skills are
    /// refused for everyone else.
    pub admin_identity: Option<String>,
    pub active_persona: String,
    pub max_context_messages: usize,
    pub max_iterations: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub search_url: Option<String>,
    pub search_enabled: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let llm_url =
            env::var("LLM_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
        let search_url = env::var("SEARCH_ENGINE_URL").ok().filter(|s| !s.is_empty());
        let search_enabled = env::var("SEARCH_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true)
            && search_url.is_some();

        Ok(Config {
            embedding_url: env::var("EMBEDDING_URL").unwrap_or_else(|_| llm_url.clone()),
            llm_url,
            llm_model: env::var("LLM_MODEL")
                .unwrap_or_else(|_| "qwen2.5:1.5b-instruct".to_string()),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "all-minilm".to_string()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "data/pincer.db".to_string()),
            admin_identity: env::var("ADMIN_IDENTITY").ok().filter(|s| !s.is_empty()),
            active_persona: env::var("ACTIVE_PERSONA").unwrap_or_else(|_| "friendly".to_string()),
            max_context_messages: env::var("MAX_CONTEXT_MESSAGES")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            max_iterations: env::var("MAX_ITERATIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            temperature: env::var("LLM_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .unwrap_or(0.7),
            max_tokens: env::var("LLM_MAX_TOKENS")
                .unwrap_or_else(|_| "2048".to_string())
                .parse()
                .unwrap_or(2048),
            search_url,
            search_enabled,
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("llm_url", &self.llm_url)
            .field("llm_model", &self.llm_model)
            .field(
                "llm_api_key",
                &self.llm_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("database_url", &self.database_url)
            .field("admin_identity", &self.admin_identity)
            .field("active_persona", &self.active_persona)
            .field("max_context_messages", &self.max_context_messages)
            .field("max_iterations", &self.max_iterations)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("search_url", &self.search_url)
            .field("search_enabled", &self.search_enabled)
            .finish()
    }
}

#[cfg(test)]
impl Config {
    /// In-memory configuration for unit tests.
    pub fn for_tests() -> Self {
        Config {
            llm_url: "http://localhost:0/v1".to_string(),
            llm_model: "test-model".to_string(),
            llm_api_key: None,
            embedding_url: "http://localhost:0/v1".to_string(),
            embedding_model: "test-embed".to_string(),
            embedding_api_key: None,
            database_url: ":memory:".to_string(),
            admin_identity: Some("cli:admin".to_string()),
            active_persona: "friendly".to_string(),
            max_context_messages: 10,
            max_iterations: 5,
            temperature: 0.7,
            max_tokens: 256,
            search_url: None,
            search_enabled: false,
        }
    }
}
