use crate::db::Database;
use crate::skills::{str_arg, ParamSpec, Skill};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

/// Stores a user-provided credential scoped to one user on one platform. The
/// value never appears in the reply or in logs.
pub struct StoreSecret {
    db: Database,
}

impl StoreSecret {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Skill for StoreSecret {
    fn name(&self) -> &str {
        "store_secret"
    }

    fn description(&self) -> &str {
        "Securely store a personal secret (like an API key)."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("key", "string"),
            ParamSpec::required("value", "string"),
            ParamSpec::required("platform", "string"),
            ParamSpec::required("user_id", "string"),
        ]
    }

    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String> {
        let key = str_arg(args, "key")?;
        let value = str_arg(args, "value")?;
        let platform = str_arg(args, "platform")?;
        let user_id = str_arg(args, "user_id")?;

        self.db.set_user_secret(platform, user_id, key, value)?;
        info!("Stored secret '{}' for {}:{}", key, platform, user_id);
        Ok(format!("I've securely stored your '{key}' secret."))
    }
}
