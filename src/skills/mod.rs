//! Skill (tool) registry with risk-gated execution.
//!
//! Skills are registered once at startup and immutable afterwards. Execution
//! never raises past this boundary: unknown names, permission failures, and
//! implementation errors all come back as text, because the consumer of these
//! results is partly the language model itself.

pub mod approval;
pub mod builtin;

use approval::{ApprovalError, ApprovalGateway};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: &'static str,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

#[async_trait]
pub trait Skill: Send + Sync {
    /// Must contain no whitespace or colons; the catalog text is parsed back
    /// out of model output.
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Vec<ParamSpec>;

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    fn admin_only(&self) -> bool {
        false
    }

    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String>;
}

pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
    index: HashMap<String, usize>,
    admin_identity: Option<String>,
    gateway: ApprovalGateway,
}

impl SkillRegistry {
    pub fn new(admin_identity: Option<String>) -> Self {
        Self {
            skills: Vec::new(),
            index: HashMap::new(),
            admin_identity,
            gateway: ApprovalGateway::new(),
        }
    }

    /// Add a skill. Re-registering a name overwrites the previous entry and is
    /// logged loudly, since it indicates a naming collision.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        if name.is_empty() || name.contains(char::is_whitespace) || name.contains(':') {
            error!("Refusing to register skill with invalid name {:?}", name);
            return;
        }
        match self.index.get(&name) {
            Some(&pos) => {
                warn!("Skill '{}' re-registered, overwriting previous entry", name);
                self.skills[pos] = skill;
            }
            None => {
                info!(
                    "Registered skill: {} (risk: {:?}, admin_only: {})",
                    name,
                    skill.risk(),
                    skill.admin_only()
                );
                self.index.insert(name, self.skills.len());
                self.skills.push(skill);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.index.get(name).map(|&pos| &self.skills[pos])
    }

    pub fn gateway(&self) -> &ApprovalGateway {
        &self.gateway
    }

    /// Render the tool catalog for prompt injection, in registration order.
    pub fn catalog(&self) -> String {
        self.skills
            .iter()
            .map(|skill| {
                let params = skill
                    .parameters()
                    .iter()
                    .map(|p| {
                        if p.required {
                            format!("{} ({}, required)", p.name, p.kind)
                        } else {
                            format!("{} ({})", p.name, p.kind)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {}: {}\n  Params: {}", skill.name(), skill.description(), params)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Gated execution entrypoint. Always returns text; see module docs.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        bypass_security: bool,
    ) -> String {
        let Some(skill) = self.get(name) else {
            return format!("Error: Skill '{name}' not found");
        };

        if skill.admin_only() && !self.is_admin(&arguments) {
            warn!(
                "Unauthorized access attempt to '{}' by {}",
                name,
                caller_identity(&arguments)
            );
            return format!("Permission Denied: Skill '{name}' is reserved for the bot administrator.");
        }

        if skill.risk() == RiskLevel::High && !bypass_security {
            return self
                .gateway
                .intercept(name, arguments.clone(), &caller_identity(&arguments));
        }

        // The loop merges ambient context into every call; drop the keys this
        // skill does not declare.
        let declared: Vec<&str> = skill.parameters().iter().map(|p| p.name).collect();
        let filtered: Map<String, Value> = arguments
            .into_iter()
            .filter(|(k, _)| declared.contains(&k.as_str()))
            .collect();

        info!("Executing skill '{}' with args: {:?}", name, filtered);
        match skill.invoke(&filtered).await {
            Ok(result) => result,
            Err(e) => {
                error!("Skill '{}' failed: {:#}", name, e);
                format!("Error: {e}")
            }
        }
    }

    /// Resume a parked high-risk call.
    pub async fn confirm(&self, request_id: &str) -> Result<String, ApprovalError> {
        let pending = self.gateway.take(request_id)?;
        info!(
            "Approval {} confirmed, executing '{}'",
            request_id, pending.skill
        );
        Ok(self.execute(&pending.skill, pending.arguments, true).await)
    }

    /// Discard a parked high-risk call without executing it.
    pub fn deny(&self, request_id: &str) -> Result<(), ApprovalError> {
        let pending = self.gateway.take(request_id)?;
        info!("Approval {} denied for '{}'", request_id, pending.skill);
        Ok(())
    }

    fn is_admin(&self, arguments: &Map<String, Value>) -> bool {
        match &self.admin_identity {
            Some(admin) => caller_identity(arguments) == *admin,
            None => false,
        }
    }
}

fn caller_identity(arguments: &Map<String, Value>) -> String {
    let field = |key: &str| {
        arguments
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    };
    format!("{}:{}", field("platform"), field("user_id"))
}

// Argument accessors shared by skill implementations. Models frequently send
// numbers as strings, so integer args accept both forms.

pub fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> anyhow::Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing required argument '{name}'"))
}

pub fn opt_str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub fn int_arg(args: &Map<String, Value>, name: &str) -> anyhow::Result<i64> {
    match args.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("argument '{name}' is not an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("argument '{name}' is not an integer")),
        _ => Err(anyhow::anyhow!("missing required argument '{name}'")),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every invocation; used to assert gating never reaches the
    /// implementation.
    pub struct SpySkill {
        pub skill_name: &'static str,
        pub params: Vec<ParamSpec>,
        pub risk: RiskLevel,
        pub admin: bool,
        pub calls: Mutex<Vec<Map<String, Value>>>,
    }

    impl SpySkill {
        pub fn new(name: &'static str, params: Vec<ParamSpec>) -> Arc<Self> {
            Arc::new(Self {
                skill_name: name,
                params,
                risk: RiskLevel::Low,
                admin: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn with_risk(name: &'static str, risk: RiskLevel) -> Arc<Self> {
            Arc::new(Self {
                skill_name: name,
                params: Vec::new(),
                risk,
                admin: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn admin_only(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                skill_name: name,
                params: Vec::new(),
                risk: RiskLevel::Low,
                admin: true,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Skill for SpySkill {
        fn name(&self) -> &str {
            self.skill_name
        }

        fn description(&self) -> &str {
            "test spy"
        }

        fn parameters(&self) -> Vec<ParamSpec> {
            self.params.clone()
        }

        fn risk(&self) -> RiskLevel {
            self.risk
        }

        fn admin_only(&self) -> bool {
            self.admin
        }

        async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(args.clone());
            Ok("done".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::SpySkill;
    use super::*;
    use crate::skills::approval::InterceptToken;
    use serde_json::json;

    fn registry_with(skills: Vec<Arc<dyn Skill>>) -> SkillRegistry {
        let mut registry = SkillRegistry::new(Some("cli:admin".to_string()));
        for skill in skills {
            registry.register(skill);
        }
        registry
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_catalog_contains_every_skill_and_param_once() {
        let registry = registry_with(vec![
            SpySkill::new(
                "send_note",
                vec![
                    ParamSpec::required("to_address", "string"),
                    ParamSpec::optional("subject", "string"),
                ],
            ),
            SpySkill::new("noop", vec![]),
        ]);

        let catalog = registry.catalog();
        for needle in ["send_note", "to_address", "subject", "noop"] {
            assert_eq!(
                catalog.matches(needle).count(),
                1,
                "{needle} should appear exactly once"
            );
        }
        assert!(catalog.contains("to_address (string, required)"));
        // Registration order preserved.
        assert!(catalog.find("send_note").unwrap() < catalog.find("noop").unwrap());
    }

    #[test]
    fn test_register_rejects_invalid_names() {
        let mut registry = SkillRegistry::new(None);
        registry.register(SpySkill::new("bad name", vec![]));
        assert!(registry.get("bad name").is_none());
    }

    #[tokio::test]
    async fn test_unknown_skill_returns_text() {
        let registry = registry_with(vec![]);
        let result = registry.execute("ghost", Map::new(), false).await;
        assert_eq!(result, "Error: Skill 'ghost' not found");
    }

    #[tokio::test]
    async fn test_admin_gating_never_invokes_implementation() {
        let spy = SpySkill::admin_only("wipe_disk");
        let registry = registry_with(vec![spy.clone()]);

        let result = registry
            .execute(
                "wipe_disk",
                args(&[("platform", json!("x")), ("user_id", json!("y"))]),
                false,
            )
            .await;

        assert!(result.starts_with("Permission Denied"));
        assert_eq!(spy.call_count(), 0);

        // The configured administrator gets through.
        let result = registry
            .execute(
                "wipe_disk",
                args(&[("platform", json!("cli")), ("user_id", json!("admin"))]),
                false,
            )
            .await;
        assert_eq!(result, "done");
        assert_eq!(spy.call_count(), 1);
    }

    #[tokio::test]
    async fn test_high_risk_is_intercepted() {
        let spy = SpySkill::with_risk("shell_command", RiskLevel::High);
        let registry = registry_with(vec![spy.clone()]);

        let result = registry
            .execute(
                "shell_command",
                args(&[("platform", json!("cli")), ("user_id", json!("local"))]),
                false,
            )
            .await;

        assert_eq!(spy.call_count(), 0);
        let token = InterceptToken::parse(&result).expect("intercept token");
        assert_eq!(token.command, "shell_command");
        assert!(registry.gateway().contains(&token.request_id));
    }

    #[tokio::test]
    async fn test_approval_resumes_exactly_once() {
        let spy = SpySkill::with_risk("shell_command", RiskLevel::High);
        let registry = registry_with(vec![spy.clone()]);

        let token = registry.execute("shell_command", Map::new(), false).await;
        let id = InterceptToken::parse(&token).unwrap().request_id;

        assert_eq!(registry.confirm(&id).await.unwrap(), "done");
        assert!(registry.confirm(&id).await.is_err());
        assert!(registry.deny(&id).is_err());
        assert_eq!(spy.call_count(), 1);
    }

    #[tokio::test]
    async fn test_deny_discards_without_executing() {
        let spy = SpySkill::with_risk("shell_command", RiskLevel::High);
        let registry = registry_with(vec![spy.clone()]);

        let token = registry.execute("shell_command", Map::new(), false).await;
        let id = InterceptToken::parse(&token).unwrap().request_id;

        registry.deny(&id).unwrap();
        assert_eq!(spy.call_count(), 0);
        assert!(!registry.gateway().contains(&id));
    }

    #[tokio::test]
    async fn test_undeclared_arguments_are_dropped() {
        let spy = SpySkill::new("noop", vec![ParamSpec::required("message", "string")]);
        let registry = registry_with(vec![spy.clone()]);

        registry
            .execute(
                "noop",
                args(&[("message", json!("hi")), ("platform", json!("cli"))]),
                false,
            )
            .await;

        let calls = spy.calls.lock().unwrap();
        assert_eq!(calls[0].len(), 1);
        assert_eq!(calls[0]["message"], "hi");
    }

    #[test]
    fn test_int_arg_accepts_string_numbers() {
        let a = args(&[("n", json!("15")), ("m", json!(7))]);
        assert_eq!(int_arg(&a, "n").unwrap(), 15);
        assert_eq!(int_arg(&a, "m").unwrap(), 7);
        assert!(int_arg(&a, "missing").is_err());
    }
}
