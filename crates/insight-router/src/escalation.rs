//! Human escalation queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use insight_storage::{KvStore, Namespace};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use ulid::Ulid;

use crate::error::RouterError;

/// Why an item was handed to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    BudgetExhausted,
    LowConfidence { confidence: f32, required: f32 },
    ProviderFailed { error: String },
    /// The task kind always goes to a person
    HumanFirst,
    /// The caller gave up on a model call before it finished
    Abandoned,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationReason::BudgetExhausted => write!(f, "budget exhausted"),
            EscalationReason::LowConfidence {
                confidence,
                required,
            } => write!(f, "confidence {confidence:.2} below {required:.2}"),
            EscalationReason::ProviderFailed { error } => write!(f, "provider failed: {error}"),
            EscalationReason::HumanFirst => write!(f, "human-first task"),
            EscalationReason::Abandoned => write!(f, "model call abandoned before it finished"),
        }
    }
}

/// A human's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub answer: String,
    pub resolved_at: DateTime<Utc>,
}

/// One request for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    /// ULID
    pub id: String,
    pub item_id: String,
    pub prompt: String,
    /// Semantic cache key for the answer, when it differs from the prompt
    #[serde(default)]
    pub query: Option<String>,
    pub reason: EscalationReason,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub resolution: Option<Resolution>,
}

impl Escalation {
    pub fn new(
        item_id: impl Into<String>,
        prompt: impl Into<String>,
        reason: EscalationReason,
        confidence: f32,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            item_id: item_id.into(),
            prompt: prompt.into(),
            query: None,
            reason,
            confidence,
            created_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    /// Text the resolved answer is cached under.
    pub fn cache_key(&self) -> &str {
        self.query.as_deref().unwrap_or(&self.prompt)
    }

    pub fn is_pending(&self) -> bool {
        self.resolution.is_none()
    }
}

/// Where escalations wait for a person.
pub trait EscalationQueue: Send + Sync {
    fn enqueue(&self, escalation: Escalation) -> Result<(), RouterError>;

    /// Unresolved escalations, oldest first.
    fn pending(&self) -> Result<Vec<Escalation>, RouterError>;

    fn get(&self, id: &str) -> Result<Option<Escalation>, RouterError>;

    /// Record a human answer. Fails if unknown or already resolved.
    fn resolve(&self, id: &str, answer: &str) -> Result<Escalation, RouterError>;

    /// Receive every escalation as it is resolved.
    fn subscribe(&self) -> broadcast::Receiver<Escalation>;
}

/// Escalation queue persisted through a `KvStore`.
pub struct KvEscalationQueue {
    store: Arc<dyn KvStore>,
    /// Serializes read-modify-write in `resolve`
    write_lock: Mutex<()>,
    resolved_tx: broadcast::Sender<Escalation>,
}

impl KvEscalationQueue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let (resolved_tx, _) = broadcast::channel(64);
        Self {
            store,
            write_lock: Mutex::new(()),
            resolved_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, escalation: &Escalation) -> Result<(), RouterError> {
        self.store.put(
            Namespace::Escalations,
            escalation.id.as_bytes(),
            &serde_json::to_vec(escalation)?,
        )?;
        Ok(())
    }

    /// Every escalation, resolved or not, oldest first.
    pub fn all(&self) -> Result<Vec<Escalation>, RouterError> {
        let mut all = Vec::new();
        for (key, value) in self.store.scan_prefix(Namespace::Escalations, b"")? {
            match serde_json::from_slice::<Escalation>(&value) {
                Ok(escalation) => all.push(escalation),
                Err(e) => {
                    warn!(key = ?String::from_utf8_lossy(&key), error = %e, "Skipping unreadable escalation");
                }
            }
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

impl EscalationQueue for KvEscalationQueue {
    fn enqueue(&self, escalation: Escalation) -> Result<(), RouterError> {
        let _guard = self.lock();
        self.save(&escalation)?;
        info!(
            id = %escalation.id,
            item = %escalation.item_id,
            reason = %escalation.reason,
            "Escalated to human review"
        );
        Ok(())
    }

    fn pending(&self) -> Result<Vec<Escalation>, RouterError> {
        Ok(self.all()?.into_iter().filter(Escalation::is_pending).collect())
    }

    fn get(&self, id: &str) -> Result<Option<Escalation>, RouterError> {
        match self.store.get(Namespace::Escalations, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn resolve(&self, id: &str, answer: &str) -> Result<Escalation, RouterError> {
        let _guard = self.lock();
        let mut escalation = self
            .get(id)?
            .ok_or_else(|| RouterError::EscalationNotFound(id.to_string()))?;
        if !escalation.is_pending() {
            return Err(RouterError::AlreadyResolved(id.to_string()));
        }
        escalation.resolution = Some(Resolution {
            answer: answer.to_string(),
            resolved_at: Utc::now(),
        });
        self.save(&escalation)?;
        info!(id, item = %escalation.item_id, "Escalation resolved");
        // No subscribers is fine.
        let _ = self.resolved_tx.send(escalation.clone());
        Ok(escalation)
    }

    fn subscribe(&self) -> broadcast::Receiver<Escalation> {
        self.resolved_tx.subscribe()
    }
}
