use crate::sched::{notification_job, NotificationSink, Scheduler, Trigger};
use crate::skills::{int_arg, str_arg, ParamSpec, Skill};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// One-shot proactive reminder, delivered back on the platform the request
/// came from.
pub struct ScheduleReminder {
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn NotificationSink>,
}

impl ScheduleReminder {
    pub fn new(scheduler: Arc<dyn Scheduler>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { scheduler, sink }
    }
}

#[async_trait]
impl Skill for ScheduleReminder {
    fn name(&self) -> &str {
        "schedule_reminder"
    }

    fn description(&self) -> &str {
        "Schedule a reminder for the user at a specific time."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("message", "string"),
            ParamSpec::required("minutes_from_now", "integer"),
            ParamSpec::required("platform", "string"),
            ParamSpec::required("user_id", "string"),
        ]
    }

    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String> {
        let message = str_arg(args, "message")?;
        let minutes = int_arg(args, "minutes_from_now")?;
        if minutes < 1 {
            anyhow::bail!("minutes_from_now must be at least 1");
        }
        let platform = str_arg(args, "platform")?;
        let user_id = str_arg(args, "user_id")?;

        let when = Utc::now() + chrono::Duration::minutes(minutes);
        info!("Scheduling reminder for {}:{} at {}", platform, user_id, when);
        self.scheduler
            .schedule(
                Trigger::At(when),
                notification_job(
                    self.sink.clone(),
                    platform.to_string(),
                    user_id.to_string(),
                    format!("REMINDER: {message}"),
                ),
            )
            .await?;

        Ok(format!(
            "I've scheduled your reminder for '{message}' in {minutes} minutes."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::TokioScheduler;
    use crate::skills::builtin::test_support::RecordingSink;
    use serde_json::json;
    use std::time::Duration;

    fn args(minutes: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("message".to_string(), json!("stretch"));
        map.insert("minutes_from_now".to_string(), minutes);
        map.insert("platform".to_string(), json!("cli"));
        map.insert("user_id".to_string(), json!("local"));
        map
    }

    #[tokio::test(start_paused = true)]
    async fn test_reminder_fires_through_sink() {
        let sink = RecordingSink::new();
        let skill = ScheduleReminder::new(Arc::new(TokioScheduler::new()), sink.clone());

        let reply = skill.invoke(&args(json!(2))).await.unwrap();
        assert!(reply.contains("'stretch' in 2 minutes"));
        assert!(sink.sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(121)).await;
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "cli");
        assert_eq!(sent[0].2, "REMINDER: stretch");
    }

    #[tokio::test]
    async fn test_invalid_minutes_is_rejected() {
        let sink = RecordingSink::new();
        let skill = ScheduleReminder::new(Arc::new(TokioScheduler::new()), sink);
        assert!(skill.invoke(&args(json!(0))).await.is_err());
        assert!(skill.invoke(&args(json!("soon"))).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_string_minutes_are_accepted() {
        let sink = RecordingSink::new();
        let skill = ScheduleReminder::new(Arc::new(TokioScheduler::new()), sink.clone());
        skill.invoke(&args(json!("1"))).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }
}
