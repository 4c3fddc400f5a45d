use crate::db::Database;
use crate::skills::{opt_str_arg, str_arg, ParamSpec, Skill};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Lets the model persist facts the user shares about themselves. Omitted
/// fields keep their stored value.
pub struct UpdateMyProfile {
    db: Database,
}

impl UpdateMyProfile {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Skill for UpdateMyProfile {
    fn name(&self) -> &str {
        "update_my_profile"
    }

    fn description(&self) -> &str {
        "Save the user's name or interests when they share them."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("name", "string"),
            ParamSpec::optional("interests", "string"),
            ParamSpec::required("platform", "string"),
            ParamSpec::required("user_id", "string"),
        ]
    }

    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String> {
        let name = opt_str_arg(args, "name");
        let interests = opt_str_arg(args, "interests");
        if name.is_none() && interests.is_none() {
            anyhow::bail!("provide at least one of 'name' or 'interests'");
        }
        let platform = str_arg(args, "platform")?;
        let user_id = str_arg(args, "user_id")?;

        self.db
            .update_user_profile(platform, user_id, name, interests)?;

        let mut saved = Vec::new();
        if name.is_some() {
            saved.push("name");
        }
        if interests.is_some() {
            saved.push("interests");
        }
        Ok(format!("Got it, I've updated your {}.", saved.join(" and ")))
    }
}
