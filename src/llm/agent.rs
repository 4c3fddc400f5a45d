//! The ReAct-style reasoning loop.
//!
//! Each iteration sends the full trace to the model with a stop sequence on
//! `Observation:` so the model cannot hallucinate its own tool results. An
//! `Action:` directive dispatches through the skill registry and feeds the
//! result back as an `Observation:` turn; output without a directive is the
//! final answer. A security intercept from the registry ends the loop
//! immediately and becomes the loop's output verbatim.
//!
//! Nothing here raises past its own boundary: provider failures and skill
//! errors all degrade to text, because the loop's downstream consumer is
//! partly the model itself.

use crate::llm::{parser, ChatMessage, ChatOptions, Provider};
use crate::skills::approval::InterceptToken;
use crate::skills::SkillRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Low temperature keeps the action grammar stable.
const REASONING_TEMPERATURE: f32 = 0.1;
const PROVIDER_ERROR_REPLY: &str =
    "Sorry, I'm having trouble reaching my language model right now.";
const EXHAUSTED_REPLY: &str = "Reasoning loop limit exceeded";

pub struct Agent {
    llm: Arc<dyn Provider>,
    skills: Arc<SkillRegistry>,
    max_iterations: usize,
}

enum StepOutcome {
    /// Observation appended; loop continues.
    Observation(String),
    /// Intercept token; loop terminates and surfaces it verbatim.
    Intercepted(String),
    /// Final answer with markers stripped.
    Final(String),
}

impl Agent {
    pub fn new(llm: Arc<dyn Provider>, skills: Arc<SkillRegistry>, max_iterations: usize) -> Self {
        Self {
            llm,
            skills,
            max_iterations,
        }
    }

    fn reasoning_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: Some(REASONING_TEMPERATURE),
            max_tokens: None,
            stop: vec!["Observation:".to_string(), "OBSERVATION:".to_string()],
        }
    }

    /// Non-streaming loop: returns the final answer, an intercept token, or a
    /// fixed failure/exhaustion message.
    pub async fn run(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        ambient: &Map<String, Value>,
    ) -> String {
        self.drive(system_prompt, history, ambient, None).await
    }

    /// Streaming variant: identical control flow, but progress notices and
    /// the terminal text are emitted through `tx` as they happen. The return
    /// value is the concatenation of what was emitted.
    pub async fn run_stream(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        ambient: &Map<String, Value>,
        tx: mpsc::Sender<String>,
    ) -> String {
        self.drive(system_prompt, history, ambient, Some(&tx)).await
    }

    async fn drive(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        ambient: &Map<String, Value>,
        tx: Option<&mpsc::Sender<String>>,
    ) -> String {
        let mut trace = Vec::with_capacity(history.len() + 1);
        trace.push(ChatMessage::system(system_prompt));
        trace.extend_from_slice(history);

        let options = self.reasoning_options();

        for i in 0..self.max_iterations {
            debug!("Reasoning loop {}/{}", i + 1, self.max_iterations);

            let content = match self.llm.chat(&trace, &options).await {
                Ok(content) => content,
                Err(e) => {
                    error!("Inference call failed, aborting loop: {:#}", e);
                    return self.emit(tx, PROVIDER_ERROR_REPLY.to_string()).await;
                }
            };
            trace.push(ChatMessage::assistant(content.clone()));

            match self.step(&content, ambient, tx).await {
                StepOutcome::Observation(observation) => {
                    trace.push(ChatMessage::user(format!("Observation: {observation}")));
                }
                StepOutcome::Intercepted(token) => {
                    info!("Loop intercepted after {} iteration(s)", i + 1);
                    return self.emit(tx, token).await;
                }
                StepOutcome::Final(answer) => {
                    info!("Loop answered after {} iteration(s)", i + 1);
                    return self.emit(tx, answer).await;
                }
            }
        }

        self.emit(tx, EXHAUSTED_REPLY.to_string()).await
    }

    async fn step(
        &self,
        content: &str,
        ambient: &Map<String, Value>,
        tx: Option<&mpsc::Sender<String>>,
    ) -> StepOutcome {
        if parser::contains_action(content) {
            if let Some(mut directive) = parser::parse_directive(content) {
                // Ambient context fills gaps; keys the model supplied win.
                for (key, value) in ambient {
                    directive
                        .arguments
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }

                if let Some(tx) = tx {
                    let _ = tx
                        .send(format!(" *Executing {}...* \n\n", directive.action))
                        .await;
                }

                let observation = self
                    .skills
                    .execute(&directive.action, directive.arguments, false)
                    .await;

                if InterceptToken::is_intercept(&observation) {
                    return StepOutcome::Intercepted(observation);
                }
                return StepOutcome::Observation(observation);
            }
            // Marker present but no usable directive; treat as a final answer.
        }
        StepOutcome::Final(parser::extract_final_answer(content))
    }

    async fn emit(&self, tx: Option<&mpsc::Sender<String>>, text: String) -> String {
        if let Some(tx) = tx {
            let _ = tx.send(text.clone()).await;
        }
        text
    }
}
