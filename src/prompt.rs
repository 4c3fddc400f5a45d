//! System-prompt assembly for one conversation turn.
//!
//! Block order is deliberate and load-bearing: persona and time lead so tone
//! dominates, and the tool protocol comes last so the action grammar is the
//! most recent instruction the model sees. Reorder at your peril.

use crate::db::UserProfile;
use crate::memory::SemanticMemory;
use crate::persona;
use crate::skills::SkillRegistry;
use chrono::Local;

const MEMORY_QUERY_LIMIT: usize = 5;

pub struct ContextAssembler<'a> {
    memory: &'a SemanticMemory,
    skills: &'a SkillRegistry,
    persona_id: &'a str,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(memory: &'a SemanticMemory, skills: &'a SkillRegistry, persona_id: &'a str) -> Self {
        Self {
            memory,
            skills,
            persona_id,
        }
    }

    pub async fn build(
        &self,
        profile: Option<&UserProfile>,
        live_search: Option<&str>,
        include_tools: bool,
        query: Option<&str>,
    ) -> String {
        let persona = persona::lookup(self.persona_id);
        let now = Local::now().format("%A, %B %d, %Y | %H:%M:%S");

        let mut prompt = format!(
            "You are Pincer, a personal assistant that remembers, acts, and keeps its \
             partner's day on track. Active persona: {}. {}\n\n\
             ### CURRENT TIME:\nToday is {}. Speak with presence.\n\n\
             ### GROUND RULES:\n\
             1. Never say 'As an AI'. Speak naturally.\n\
             2. Weave shared history from your memory section in when it is relevant.\n\
             3. When the user shares their name or interests, use the `update_my_profile` tool.\n\
             4. Address the user by name when you know it.\n",
            persona.name, persona.directive, now
        );

        if let Some(query) = query {
            let hits = self.memory.query(query, MEMORY_QUERY_LIMIT).await;
            if !hits.is_empty() {
                prompt.push_str("\n### RELEVANT MEMORY (PAST CONTEXT):\n");
                for hit in hits {
                    prompt.push_str(&format!(
                        "[{}] {}: {}\n",
                        hit.timestamp,
                        hit.role.to_uppercase(),
                        hit.content
                    ));
                }
            }
        }

        if let Some(search) = live_search {
            prompt.push_str("\n### LIVE SEARCH RESULTS:\n");
            prompt.push_str(search);
            prompt.push('\n');
        }

        if let Some(profile) = profile {
            if let Some(name) = &profile.name {
                prompt.push_str(&format!(
                    "\n### USER PROFILE:\nName: {}\nInterests: {}\n",
                    name,
                    profile.interests.as_deref().unwrap_or("unknown")
                ));
            }
        }

        if include_tools {
            prompt.push_str(&format!(
                "\n### ACTION PROTOCOL (MANDATORY):\n\
                 If you need to perform an action, you MUST use this format EXACTLY:\n\
                 Thought: [your reasoning]\n\
                 Action: [tool_name]\n\
                 Arguments: [JSON object]\n\n\
                 Wait for Observation BEFORE giving your Final Answer.\n\
                 AVAILABLE TOOLS:\n{}\n\
                 ### END PROTOCOL ###\n",
                self.skills.catalog()
            ));
        }

        prompt
    }
}
