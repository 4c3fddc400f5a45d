//! Built-in skills shipped with every deployment.
//!
//! Each skill is a small struct over the shared service handles in
//! `BuiltinDeps`. Skills that message the user later (reminders, watchdogs)
//! go through the `NotificationSink` seam rather than any transport directly.

mod profile;
mod reminder;
mod secret;
mod system;
mod watch;

use crate::db::Database;
use crate::sched::{NotificationSink, Scheduler};
use crate::skills::SkillRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct BuiltinDeps {
    pub db: Database,
    pub scheduler: Arc<dyn Scheduler>,
    pub sink: Arc<dyn NotificationSink>,
    pub http: reqwest::Client,
}

pub fn register_builtin(registry: &mut SkillRegistry, deps: &BuiltinDeps) {
    registry.register(Arc::new(reminder::ScheduleReminder::new(
        deps.scheduler.clone(),
        deps.sink.clone(),
    )));
    registry.register(Arc::new(watch::WatchUrl::new(
        deps.scheduler.clone(),
        deps.sink.clone(),
        deps.http.clone(),
    )));
    registry.register(Arc::new(profile::UpdateMyProfile::new(deps.db.clone())));
    registry.register(Arc::new(secret::StoreSecret::new(deps.db.clone())));
    registry.register(Arc::new(system::ReadFile));
    registry.register(Arc::new(system::ShellCommand));
}
