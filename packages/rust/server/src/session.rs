//! Per-browser-session pipeline state.
//!
//! Every session owns its own [`Pipeline`]; nothing is shared between
//! sessions except the read-only provider set the pipelines were built from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;
use uuid::Uuid;

use leadscout_core::Pipeline;
use leadscout_shared::{LeadScoutError, Result};

/// Outcome of a deep-enrichment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub processed: usize,
    pub total: usize,
    pub profiles_scraped: usize,
    pub stacks_detected: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

pub struct Session {
    pub pipeline: Pipeline,
    pub tasks: HashMap<String, EnrichmentTask>,
}

impl Session {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            tasks: HashMap::new(),
        }
    }
}

pub type SharedSession = Arc<AsyncMutex<Session>>;

/// Idle time after which a session is dropped.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Random id in UUID simple form.
pub fn new_id() -> String {
    Uuid::now_v7().simple().to_string()
}

struct Entry {
    session: SharedSession,
    last_used: Instant,
}

/// All live sessions, plus an index from task id to owning session.
///
/// Sessions idle for longer than the TTL are pruned whenever a new one is
/// inserted, together with the task ids they own.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Entry>>>,
    task_owners: Arc<Mutex<HashMap<String, String>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::default(),
            task_owners: Arc::default(),
            ttl,
        }
    }

    /// Register `session` under a fresh id.
    pub fn insert(&self, session: Session) -> (String, SharedSession) {
        let pruned = self.prune_idle();
        if pruned > 0 {
            debug!(pruned, "dropped idle sessions");
        }

        let id = new_id();
        let shared = Arc::new(AsyncMutex::new(session));
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                Entry {
                    session: shared.clone(),
                    last_used: Instant::now(),
                },
            );
        (id, shared)
    }

    /// Look up a session and mark it as used.
    pub fn get(&self, id: &str) -> Result<SharedSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| LeadScoutError::user_input(format!("unknown session '{id}'")))?;
        entry.last_used = Instant::now();
        Ok(entry.session.clone())
    }

    /// Drop sessions idle for at least the TTL and the tasks they own.
    /// Returns how many sessions were removed.
    pub fn prune_idle(&self) -> usize {
        let expired: Vec<String> = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.last_used.elapsed() >= self.ttl)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                sessions.remove(id);
            }
            expired
        };

        if !expired.is_empty() {
            self.task_owners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|_, owner| !expired.contains(owner));
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn register_task(&self, task_id: &str, session_id: &str) {
        self.task_owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string(), session_id.to_string());
    }

    /// Session id that owns `task_id`.
    pub fn task_owner(&self, task_id: &str) -> Option<String> {
        self.task_owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }
}
