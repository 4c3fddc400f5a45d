//! Human-in-the-loop approval for high-risk skill calls.
//!
//! A HIGH-risk execution is parked here instead of running; the caller gets an
//! intercept token carrying an opaque request id. The token string is a wire
//! contract: every transport and the streaming loop split it on whitespace and
//! `:` to extract the fields, so its shape must not change.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

pub const INTERCEPT_PREFIX: &str = "[SECURITY_INTERCEPT]";

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval request '{0}' not found or already resolved")]
    RequestNotFound(String),
}

#[derive(Clone, Debug)]
pub struct PendingApproval {
    pub skill: String,
    pub arguments: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub initiator: String,
}

/// Pending-approval store. Interior mutex because reasoning loops for
/// different users run on a multi-threaded runtime.
#[derive(Default)]
pub struct ApprovalGateway {
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl ApprovalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a skill call and return the intercept token for the UI layer.
    pub fn intercept(&self, skill: &str, arguments: Map<String, Value>, initiator: &str) -> String {
        let request_id = new_request_id();
        warn!(
            "Security intercept: '{}' requested by {} parked as request {}",
            skill, initiator, request_id
        );
        self.pending.lock().unwrap().insert(
            request_id.clone(),
            PendingApproval {
                skill: skill.to_string(),
                arguments,
                created_at: Utc::now(),
                initiator: initiator.to_string(),
            },
        );
        format!("{INTERCEPT_PREFIX} ID:{request_id} COMMAND:{skill}")
    }

    /// Consume a pending request. Each request resolves at most once; a second
    /// take fails with `RequestNotFound`.
    pub fn take(&self, request_id: &str) -> Result<PendingApproval, ApprovalError> {
        self.pending
            .lock()
            .unwrap()
            .remove(request_id)
            .ok_or_else(|| ApprovalError::RequestNotFound(request_id.to_string()))
    }

    pub fn pending(&self) -> Vec<(String, PendingApproval)> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.lock().unwrap().contains_key(request_id)
    }

    /// Drop requests older than `ttl`. No sweep is wired up by default; the
    /// intended request lifetime is an open product decision.
    pub fn expire_older_than(&self, ttl: chrono::Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|id, p| {
            let keep = p.created_at >= cutoff;
            if !keep {
                info!("Expiring stale approval request {} for '{}'", id, p.skill);
            }
            keep
        });
        before - pending.len()
    }
}

fn new_request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Parsed form of the intercept token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterceptToken {
    pub request_id: String,
    pub command: String,
}

impl InterceptToken {
    pub fn is_intercept(text: &str) -> bool {
        text.contains(INTERCEPT_PREFIX)
    }

    /// Split on whitespace, then on `:`, per the wire contract.
    pub fn parse(text: &str) -> Option<Self> {
        if !Self::is_intercept(text) {
            return None;
        }
        let mut request_id = None;
        let mut command = None;
        for field in text.split_whitespace() {
            if let Some((key, value)) = field.split_once(':') {
                match key {
                    "ID" => request_id = Some(value.to_string()),
                    "COMMAND" => command = Some(value.to_string()),
                    _ => {}
                }
            }
        }
        Some(Self {
            request_id: request_id?,
            command: command?,
        })
    }
}
