use crate::sched::{NotificationSink, Scheduler, Trigger};
use crate::skills::{int_arg, str_arg, ParamSpec, Skill};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// What the watcher last saw for a URL. `Unreachable` covers transport
/// errors; HTTP responses carry their status code.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Observed {
    Status(u16),
    Unreachable,
}

/// Recurring URL monitor. Alerts only when the observed state changes, so a
/// site that stays down produces one alert, not one per interval; recovery is
/// reported too.
pub struct WatchUrl {
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn NotificationSink>,
    http: reqwest::Client,
}

impl WatchUrl {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        sink: Arc<dyn NotificationSink>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            scheduler,
            sink,
            http,
        }
    }
}

#[async_trait]
impl Skill for WatchUrl {
    fn name(&self) -> &str {
        "watch_url"
    }

    fn description(&self) -> &str {
        "Set up a watchdog to monitor a URL. The bot will alert you when its status changes."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("url", "string"),
            ParamSpec::required("interval_minutes", "integer"),
            ParamSpec::required("platform", "string"),
            ParamSpec::required("user_id", "string"),
        ]
    }

    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String> {
        let url = str_arg(args, "url")?.to_string();
        let interval = int_arg(args, "interval_minutes")?;
        if interval < 1 {
            anyhow::bail!("interval_minutes must be at least 1");
        }
        let platform = str_arg(args, "platform")?.to_string();
        let user_id = str_arg(args, "user_id")?.to_string();

        info!("Starting watchdog on {} every {} minute(s)", url, interval);

        let http = self.http.clone();
        let sink = self.sink.clone();
        let last: Arc<Mutex<Option<Observed>>> = Arc::new(Mutex::new(None));
        let reply_url = url.clone();

        let job: crate::sched::JobFn = Arc::new(move || {
            let http = http.clone();
            let sink = sink.clone();
            let last = last.clone();
            let url = url.clone();
            let platform = platform.clone();
            let user_id = user_id.clone();
            Box::pin(async move {
                let observed = match http
                    .get(&url)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await
                {
                    Ok(response) => Observed::Status(response.status().as_u16()),
                    Err(_) => Observed::Unreachable,
                };

                let previous = {
                    let mut guard = last.lock().unwrap();
                    guard.replace(observed)
                };
                if previous == Some(observed) {
                    return;
                }
                // Healthy first check establishes the baseline silently.
                if previous.is_none() && observed == Observed::Status(200) {
                    return;
                }

                let message = match observed {
                    Observed::Status(200) => {
                        format!("Watchdog: {url} has recovered (status 200).")
                    }
                    Observed::Status(status) => {
                        format!("Watchdog Alert: {url} is reporting status {status}.")
                    }
                    Observed::Unreachable => {
                        format!("Watchdog Failure: I couldn't reach {url}.")
                    }
                };
                if let Err(e) = sink.notify(&platform, &user_id, &message).await {
                    error!("Watchdog notification failed: {:#}", e);
                }
            })
        });

        self.scheduler
            .schedule(
                Trigger::Every(Duration::from_secs(interval as u64 * 60)),
                job,
            )
            .await?;

        Ok(format!(
            "I've set up a watchdog for {reply_url}. I'll check it every {interval} minutes and alert you when its status changes."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::JobFn;
    use crate::skills::builtin::test_support::RecordingSink;
    use async_trait::async_trait;
    use serde_json::json;

    /// Captures the job instead of running it so tests can drive the checks
    /// by hand.
    struct CapturingScheduler {
        job: Mutex<Option<JobFn>>,
    }

    #[async_trait]
    impl Scheduler for CapturingScheduler {
        async fn schedule(&self, _: Trigger, job: JobFn) -> anyhow::Result<crate::sched::JobId> {
            *self.job.lock().unwrap() = Some(job);
            Ok(1)
        }

        async fn cancel(&self, _: crate::sched::JobId) -> bool {
            false
        }
    }

    fn args(url: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("url".to_string(), json!(url));
        map.insert("interval_minutes".to_string(), json!(5));
        map.insert("platform".to_string(), json!("cli"));
        map.insert("user_id".to_string(), json!("local"));
        map
    }

    #[tokio::test]
    async fn test_unreachable_target_alerts_once_until_state_changes() {
        let scheduler = Arc::new(CapturingScheduler {
            job: Mutex::new(None),
        });
        let sink = RecordingSink::new();
        let skill = WatchUrl::new(scheduler.clone(), sink.clone(), reqwest::Client::new());

        // Port 9 on localhost refuses connections.
        let reply = skill.invoke(&args("http://127.0.0.1:9/")).await.unwrap();
        assert!(reply.contains("watchdog"));

        let job = scheduler.job.lock().unwrap().clone().unwrap();
        job().await;
        job().await;
        job().await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1, "repeated failures must not re-alert");
        assert!(sent[0].2.contains("Watchdog Failure"));
    }

    #[tokio::test]
    async fn test_invalid_interval_is_rejected() {
        let scheduler = Arc::new(CapturingScheduler {
            job: Mutex::new(None),
        });
        let skill = WatchUrl::new(scheduler, RecordingSink::new(), reqwest::Client::new());
        let mut bad = args("http://example.com");
        bad.insert("interval_minutes".to_string(), json!(0));
        assert!(skill.invoke(&bad).await.is_err());
    }
}
