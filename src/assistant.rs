//! One conversation turn, end to end: persist the incoming message, gather
//! context, run the reasoning loop, persist the reply.
//!
//! Two details are deliberate. History is fetched before the new message is
//! appended so the model never sees the current message twice. And intercept
//! tokens are returned to the transport but never persisted; the conversation
//! record only ever holds real dialogue.

use crate::config::Config;
use crate::db::Database;
use crate::llm::agent::Agent;
use crate::llm::{ChatMessage, Provider};
use crate::memory::SemanticMemory;
use crate::prompt::ContextAssembler;
use crate::search::{self, SearchClient};
use crate::skills::approval::{ApprovalError, InterceptToken};
use crate::skills::SkillRegistry;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct Assistant {
    db: Database,
    memory: Arc<SemanticMemory>,
    skills: Arc<SkillRegistry>,
    llm: Arc<dyn Provider>,
    agent: Agent,
    search: Option<SearchClient>,
    active_persona: Mutex<String>,
    max_context_messages: usize,
    temperature: f32,
    max_tokens: u32,
}

impl Assistant {
    pub fn new(
        config: &Config,
        db: Database,
        llm: Arc<dyn Provider>,
        skills: Arc<SkillRegistry>,
    ) -> Self {
        let memory = Arc::new(SemanticMemory::new(db.clone(), llm.clone()));
        let agent = Agent::new(llm.clone(), skills.clone(), config.max_iterations);
        let search = match (&config.search_url, config.search_enabled) {
            (Some(url), true) => Some(SearchClient::new(url)),
            _ => None,
        };
        Self {
            db,
            memory,
            skills,
            llm,
            agent,
            search,
            active_persona: Mutex::new(config.active_persona.clone()),
            max_context_messages: config.max_context_messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub async fn handle_message(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
        text: &str,
    ) -> String {
        self.run_turn(platform, user_id, channel_id, text, None).await
    }

    /// Streaming turn: progress notices and the reply flow through `tx`; the
    /// full reply is also returned for persistence checks.
    pub async fn handle_message_stream(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
        text: &str,
        tx: mpsc::Sender<String>,
    ) -> String {
        self.run_turn(platform, user_id, channel_id, text, Some(tx))
            .await
    }

    async fn run_turn(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
        text: &str,
        tx: Option<mpsc::Sender<String>>,
    ) -> String {
        // History first, then append, so the turn being handled appears in
        // the trace exactly once.
        let history = match self.db.recent_messages(
            platform,
            user_id,
            channel_id,
            self.max_context_messages,
        ) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load history for {}:{}: {:#}", platform, user_id, e);
                Vec::new()
            }
        };

        match self
            .db
            .append_message(platform, user_id, channel_id, "user", text, None)
        {
            Ok(message_id) => self.index_in_background(message_id, text),
            Err(e) => warn!("Failed to persist user message: {:#}", e),
        }

        let live_search = match &self.search {
            Some(client) if search::is_fact_seeking(text) => {
                info!("Search intent detected, fetching real-time data");
                Some(client.search(text).await)
            }
            _ => None,
        };

        let profile = self.db.get_user_profile(platform, user_id).ok();
        let persona = self.active_persona.lock().unwrap().clone();
        let system_prompt = ContextAssembler::new(&self.memory, &self.skills, &persona)
            .build(profile.as_ref(), live_search.as_deref(), true, Some(text))
            .await;

        let mut trace: Vec<ChatMessage> = history
            .iter()
            .map(|m| match m.role.as_str() {
                "assistant" => ChatMessage::assistant(&m.content),
                _ => ChatMessage::user(&m.content),
            })
            .collect();
        trace.push(ChatMessage::user(text));

        let ambient = ambient_context(platform, user_id, channel_id);
        let reply = match tx {
            Some(tx) => {
                self.agent
                    .run_stream(&system_prompt, &trace, &ambient, tx)
                    .await
            }
            None => self.agent.run(&system_prompt, &trace, &ambient).await,
        };

        if !InterceptToken::is_intercept(&reply) {
            self.persist_reply(platform, user_id, channel_id, &reply);
        }
        reply
    }

    /// Tool-less streaming turn: full context but no action protocol, tokens
    /// forwarded as the model emits them. Used where latency matters more
    /// than agency.
    pub async fn quick_chat_stream(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
        text: &str,
        tx: mpsc::Sender<String>,
    ) -> String {
        let history = self
            .db
            .recent_messages(platform, user_id, channel_id, self.max_context_messages)
            .unwrap_or_default();
        match self
            .db
            .append_message(platform, user_id, channel_id, "user", text, None)
        {
            Ok(message_id) => self.index_in_background(message_id, text),
            Err(e) => warn!("Failed to persist user message: {:#}", e),
        }

        let profile = self.db.get_user_profile(platform, user_id).ok();
        let persona = self.active_persona.lock().unwrap().clone();
        let system_prompt = ContextAssembler::new(&self.memory, &self.skills, &persona)
            .build(profile.as_ref(), None, false, Some(text))
            .await;

        let mut trace = vec![ChatMessage::system(&system_prompt)];
        trace.extend(history.iter().map(|m| match m.role.as_str() {
            "assistant" => ChatMessage::assistant(&m.content),
            _ => ChatMessage::user(&m.content),
        }));
        trace.push(ChatMessage::user(text));

        let options = crate::llm::ChatOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            stop: Vec::new(),
        };

        let (inner_tx, mut inner_rx) = mpsc::channel::<String>(32);
        let llm = self.llm.clone();
        let stream = tokio::spawn(async move {
            llm.chat_stream(&trace, &options, inner_tx).await
        });

        let mut reply = String::new();
        while let Some(chunk) = inner_rx.recv().await {
            reply.push_str(&chunk);
            let _ = tx.send(chunk).await;
        }
        match stream.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Streaming chat failed: {:#}", e),
            Err(e) => warn!("Streaming task panicked: {:#}", e),
        }

        if !reply.is_empty() {
            self.persist_reply(platform, user_id, channel_id, &reply);
        }
        reply
    }

    /// Resume a pending high-risk action. The result joins the conversation
    /// record as an assistant turn.
    pub async fn approve(
        &self,
        platform: &str,
        user_id: &str,
        request_id: &str,
    ) -> Result<String, ApprovalError> {
        let result = self.skills.confirm(request_id).await?;
        self.persist_reply(platform, user_id, None, &result);
        Ok(result)
    }

    pub fn deny(&self, request_id: &str) -> Result<(), ApprovalError> {
        self.skills.deny(request_id)
    }

    /// Requests parked by the approval gateway, awaiting a verdict.
    pub fn pending_approvals(&self) -> Vec<(String, crate::skills::approval::PendingApproval)> {
        self.skills.gateway().pending()
    }

    pub fn reset(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
    ) -> anyhow::Result<usize> {
        self.db.clear_conversation(platform, user_id, channel_id)
    }

    pub fn set_persona(&self, id: &str) -> bool {
        let known = crate::persona::all().iter().any(|p| p.id == id);
        if known {
            *self.active_persona.lock().unwrap() = id.to_string();
            info!("Active persona switched to '{}'", id);
        }
        known
    }

    pub fn persona(&self) -> String {
        self.active_persona.lock().unwrap().clone()
    }

    pub fn stats(&self) -> anyhow::Result<crate::db::Stats> {
        self.db.stats()
    }

    fn persist_reply(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
        reply: &str,
    ) {
        match self
            .db
            .append_message(platform, user_id, channel_id, "assistant", reply, None)
        {
            Ok(message_id) => self.index_in_background(message_id, reply),
            Err(e) => warn!("Failed to persist assistant reply: {:#}", e),
        }
    }

    /// Fire-and-forget embedding: retrieval is eventually consistent and a
    /// slow or broken embedding server must never block a turn.
    fn index_in_background(&self, message_id: i64, text: &str) {
        let memory = self.memory.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            memory.index(message_id, &text).await;
        });
    }
}

fn ambient_context(platform: &str, user_id: &str, channel_id: Option<&str>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("platform".to_string(), json!(platform));
    map.insert("user_id".to_string(), json!(user_id));
    if let Some(channel) = channel_id {
        map.insert("channel_id".to_string(), json!(channel));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatOptions;
    use crate::skills::test_support::SpySkill;
    use crate::skills::RiskLevel;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct ScriptedProvider {
        outputs: std::sync::Mutex<VecDeque<String>>,
    }

    impl ScriptedProvider {
        fn new(outputs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                outputs: std::sync::Mutex::new(
                    outputs.iter().map(|s| s.to_string()).collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> anyhow::Result<String> {
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "Final Answer: ok".to_string()))
        }

        async fn embed(&self, _: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn assistant_with(
        outputs: &[&str],
        skills: Vec<Arc<SpySkill>>,
    ) -> (Assistant, Database) {
        let config = Config::for_tests();
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        let mut registry = SkillRegistry::new(config.admin_identity.clone());
        for skill in skills {
            registry.register(skill);
        }
        let assistant = Assistant::new(
            &config,
            db.clone(),
            ScriptedProvider::new(outputs),
            Arc::new(registry),
        );
        (assistant, db)
    }

    #[tokio::test]
    async fn test_turn_persists_both_sides() {
        let (assistant, db) = assistant_with(&["Final Answer: hello Ada"], vec![]);

        let reply = assistant.handle_message("cli", "local", None, "hi").await;
        assert_eq!(reply, "hello Ada");

        let messages = db.recent_messages("cli", "local", None, 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "hello Ada");
    }

    #[tokio::test]
    async fn test_intercept_is_returned_but_not_persisted() {
        let dangerous = SpySkill::with_risk("dangerous", RiskLevel::High);
        let (assistant, db) = assistant_with(
            &["Action: dangerous\nArguments: {}"],
            vec![dangerous],
        );

        let reply = assistant.handle_message("cli", "local", None, "do it").await;
        assert!(InterceptToken::parse(&reply).is_some());

        let messages = db.recent_messages("cli", "local", None, 10).unwrap();
        assert_eq!(messages.len(), 1, "only the user turn is recorded");
        assert_eq!(messages[0].role, "user");
    }

    #[tokio::test]
    async fn test_approve_runs_skill_and_persists_result() {
        let dangerous = SpySkill::with_risk("dangerous", RiskLevel::High);
        let (assistant, db) = assistant_with(
            &["Action: dangerous\nArguments: {}"],
            vec![dangerous.clone()],
        );

        let token = assistant.handle_message("cli", "admin", None, "do it").await;
        let id = InterceptToken::parse(&token).unwrap().request_id;

        let result = assistant.approve("cli", "admin", &id).await.unwrap();
        assert_eq!(result, "done");
        assert_eq!(dangerous.call_count(), 1);

        let messages = db.recent_messages("cli", "admin", None, 10).unwrap();
        assert_eq!(messages.last().unwrap().content, "done");
    }

    #[tokio::test]
    async fn test_deny_discards_pending_request() {
        let dangerous = SpySkill::with_risk("dangerous", RiskLevel::High);
        let (assistant, _db) = assistant_with(
            &["Action: dangerous\nArguments: {}"],
            vec![dangerous.clone()],
        );

        let token = assistant.handle_message("cli", "local", None, "do it").await;
        let id = InterceptToken::parse(&token).unwrap().request_id;

        assistant.deny(&id).unwrap();
        assert!(assistant.deny(&id).is_err());
        assert_eq!(dangerous.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let (assistant, db) = assistant_with(&["Final Answer: one"], vec![]);
        assistant.handle_message("cli", "local", None, "hi").await;
        assert!(assistant.reset("cli", "local", None).unwrap() >= 2);
        assert!(db.recent_messages("cli", "local", None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quick_chat_streams_and_persists() {
        let (assistant, db) = assistant_with(&["evening plans sound lovely"], vec![]);

        let (tx, mut rx) = mpsc::channel(8);
        let reply = assistant
            .quick_chat_stream("cli", "local", None, "hello", tx)
            .await;
        assert_eq!(reply, "evening plans sound lovely");

        let mut streamed = String::new();
        while let Ok(chunk) = rx.try_recv() {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, reply);

        let messages = db.recent_messages("cli", "local", None, 10).unwrap();
        assert_eq!(messages.last().unwrap().content, reply);
    }

    #[tokio::test]
    async fn test_persona_switching_validates_id() {
        let (assistant, _db) = assistant_with(&[], vec![]);
        assert!(assistant.set_persona("sarcastic"));
        assert_eq!(assistant.persona(), "sarcastic");
        assert!(!assistant.set_persona("nonexistent"));
        assert_eq!(assistant.persona(), "sarcastic");
    }
}
