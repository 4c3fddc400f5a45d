//! Background job scheduling and proactive notification delivery.
//!
//! The `Scheduler` trait is the seam skills depend on; `TokioScheduler` is the
//! in-process implementation, spawning one task per job. Jobs are not
//! persisted across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub type JobId = u64;
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Clone, Debug)]
pub enum Trigger {
    /// Fire once at an absolute instant. Instants already in the past fire
    /// immediately.
    At(DateTime<Utc>),
    /// Fire repeatedly with a fixed period, first firing one period from now.
    Every(Duration),
    /// Fire on a standard five-field cron expression, evaluated in UTC.
    Cron(String),
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, trigger: Trigger, job: JobFn) -> anyhow::Result<JobId>;
    async fn cancel(&self, id: JobId) -> bool;
}

/// Delivery seam for messages the assistant initiates (reminders, watch
/// alerts). Transports implement this.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, platform: &str, user_id: &str, message: &str) -> anyhow::Result<()>;
}

pub struct TokioScheduler {
    next_id: AtomicU64,
    jobs: tokio::sync::Mutex<Vec<(JobId, JoinHandle<()>)>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    async fn track(&self, handle: JoinHandle<()>) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|(_, h)| !h.is_finished());
        jobs.push((id, handle));
        id
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule(&self, trigger: Trigger, job: JobFn) -> anyhow::Result<JobId> {
        let handle = match trigger {
            Trigger::At(when) => {
                let delay = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                info!("Scheduling one-shot job in {:?}", delay);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    job().await;
                })
            }
            Trigger::Every(period) => {
                if period.is_zero() {
                    anyhow::bail!("interval period must be non-zero");
                }
                info!("Scheduling interval job every {:?}", period);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    // First tick completes immediately; skip it.
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        job().await;
                    }
                })
            }
            Trigger::Cron(expr) => {
                // The cron crate wants a seconds field; accept the common
                // five-field form by prefixing one.
                let normalized = if expr.split_whitespace().count() == 5 {
                    format!("0 {expr}")
                } else {
                    expr.clone()
                };
                let schedule = Schedule::from_str(&normalized)
                    .map_err(|e| anyhow::anyhow!("invalid cron expression '{expr}': {e}"))?;
                info!("Scheduling cron job: {}", expr);
                tokio::spawn(async move {
                    loop {
                        let Some(next) = schedule.upcoming(Utc).next() else {
                            warn!("Cron schedule has no upcoming fire times, stopping");
                            break;
                        };
                        let delay = match (next - Utc::now()).to_std() {
                            Ok(d) => d,
                            Err(_) => continue,
                        };
                        tokio::time::sleep(delay).await;
                        job().await;
                    }
                })
            }
        };
        Ok(self.track(handle).await)
    }

    async fn cancel(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.lock().await;
        if let Some(pos) = jobs.iter().position(|(job_id, _)| *job_id == id) {
            let (_, handle) = jobs.swap_remove(pos);
            handle.abort();
            true
        } else {
            false
        }
    }
}

/// Convenience wrapper used by skills: deliver one message through the sink,
/// logging instead of propagating since jobs have no caller to report to.
pub fn notification_job(
    sink: Arc<dyn NotificationSink>,
    platform: String,
    user_id: String,
    message: String,
) -> JobFn {
    Arc::new(move || {
        let sink = sink.clone();
        let platform = platform.clone();
        let user_id = user_id.clone();
        let message = message.clone();
        Box::pin(async move {
            if let Err(e) = sink.notify(&platform, &user_id, &message).await {
                error!("Notification delivery failed for {}:{}: {:#}", platform, user_id, e);
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn counting_job(counter: Arc<AtomicUsize>) -> JobFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(
                Trigger::At(Utc::now() + chrono::Duration::seconds(30)),
                counting_job(counter.clone()),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_instant_fires_immediately() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(
                Trigger::At(Utc::now() - chrono::Duration::minutes(5)),
                counting_job(counter.clone()),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_repeats() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(
                Trigger::Every(Duration::from_secs(60)),
                counting_job(counter.clone()),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_interval_and_bad_cron_are_rejected() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(scheduler
            .schedule(Trigger::Every(Duration::ZERO), counting_job(counter.clone()))
            .await
            .is_err());
        assert!(scheduler
            .schedule(Trigger::Cron("not a cron".to_string()), counting_job(counter))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_five_field_cron_is_accepted() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = scheduler
            .schedule(Trigger::Cron("0 8 * * *".to_string()), counting_job(counter))
            .await
            .unwrap();
        scheduler.cancel(id).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_job() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = scheduler
            .schedule(
                Trigger::Every(Duration::from_secs(60)),
                counting_job(counter.clone()),
            )
            .await
            .unwrap();

        assert!(scheduler.cancel(id).await);
        assert!(!scheduler.cancel(id).await);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    struct RecordingSink {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, platform: &str, user_id: &str, message: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((
                platform.to_string(),
                user_id.to_string(),
                message.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notification_job_delivers_through_sink() {
        let sink = Arc::new(RecordingSink {
            sent: Mutex::new(Vec::new()),
        });
        let job = notification_job(
            sink.clone(),
            "cli".to_string(),
            "local".to_string(),
            "tea time".to_string(),
        );
        job().await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(
            sent[0],
            ("cli".to_string(), "local".to_string(), "tea time".to_string())
        );
    }
}
