//! Conversation state machine.
//!
//! One [`ConversationSession`] per chat. A session holds at most one pending
//! batch; the batch only reaches the store after an explicit affirmative
//! reply.
//!
//! ```text
//!            instruction                 preview ok
//!   Idle ─────────────────▶ AwaitingGeneration ─────────▶ AwaitingConfirmation
//!    ▲                              │                          │
//!    │   no tasks / any error       │        yes: apply        │
//!    ├──────────────────────────────┘        anything else:    │
//!    └─────────────────────────────────────── cancel ◀─────────┘
//! ```
//!
//! While a batch is pending, every reply other than an affirmative token
//! cancels it. A new instruction sent in that state is not processed; the
//! user sends it again once the session is back to `Idle`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::apply::{apply, ApplyReport};
use crate::diff::{preview, DiffReport, DEFAULT_PREVIEW_LIMIT};
use crate::error::{WorkflowError, WorkflowResult};
use crate::generator::TaskGenerator;
use crate::store::DatasetStore;
use crate::task::TaskBatch;

// =============================================================================
// Confirmation vocabulary
// =============================================================================

/// Replies that confirm a pending batch, compared after trim + lowercase.
pub const AFFIRMATIVE: &[&str] = &["yes", "y", "确认", "是"];

/// Messages kept per session; older ones are dropped at the start of a turn.
pub const MAX_HISTORY: usize = 200;

/// Sessions untouched for this long are evicted.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Replies that explicitly reject a pending batch.
pub const NEGATIVE: &[&str] = &["no", "n", "取消", "否"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Affirmative,
    Negative,
    /// Not a confirmation token. Handled like `Negative`.
    Other,
}

pub fn classify_confirmation(text: &str) -> Confirmation {
    let reply = text.trim().to_lowercase();
    if AFFIRMATIVE.contains(&reply.as_str()) {
        Confirmation::Affirmative
    } else if NEGATIVE.contains(&reply.as_str()) {
        Confirmation::Negative
    } else {
        Confirmation::Other
    }
}

// =============================================================================
// Messages and state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// The batch awaiting confirmation, with the preview the user saw.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub instruction: String,
    pub batch: TaskBatch,
    pub preview: DiffReport,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Generation call in flight.
    AwaitingGeneration,
    AwaitingConfirmation(PendingBatch),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingGeneration => "awaiting_generation",
            SessionState::AwaitingConfirmation(_) => "awaiting_confirmation",
        }
    }
}

/// What a successful turn did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "report", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// A batch was generated and is now pending.
    Previewed(DiffReport),
    Applied(ApplyReport),
    /// The pending batch was discarded.
    Cancelled,
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug)]
pub struct ConversationSession {
    id: String,
    messages: Vec<ChatMessage>,
    /// Messages trimmed off the front of `messages` so far.
    dropped: usize,
    state: SessionState,
    preview_limit: usize,
    last_activity: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            dropped: 0,
            state: SessionState::Idle,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            last_activity: Utc::now(),
        }
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages ever appended, trimmed ones included.
    pub fn message_seq(&self) -> usize {
        self.dropped + self.messages.len()
    }

    /// Messages appended after sequence number `seq` (see [`message_seq`](Self::message_seq)).
    pub fn messages_since(&self, seq: usize) -> &[ChatMessage] {
        let start = seq.saturating_sub(self.dropped).min(self.messages.len());
        &self.messages[start..]
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Whether the session has been untouched for longer than `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        (now - self.last_activity)
            .to_std()
            .map(|idle| idle > ttl)
            .unwrap_or(false)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn pending_batch(&self) -> Option<&PendingBatch> {
        match &self.state {
            SessionState::AwaitingConfirmation(pending) => Some(pending),
            _ => None,
        }
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.pending_batch().is_some()
    }

    /// Process one user turn.
    ///
    /// On error the session is back in `Idle`, any pending batch is gone and
    /// the error has been appended to the message log.
    pub async fn handle_input(
        &mut self,
        text: &str,
        generator: &dyn TaskGenerator,
        store: &dyn DatasetStore,
    ) -> WorkflowResult<TurnOutcome> {
        self.trim_history();
        self.push(Role::User, text);

        let state = std::mem::take(&mut self.state);
        let result = match state {
            SessionState::AwaitingConfirmation(pending) => self.confirm(text, pending, store).await,
            SessionState::AwaitingGeneration => {
                // Only reachable if a previous turn was dropped mid-generation
                warn!(session = %self.id, "resetting interrupted generation");
                self.instruct(text, generator, store).await
            }
            SessionState::Idle => self.instruct(text, generator, store).await,
        };

        if let Err(e) = &result {
            warn!(session = %self.id, error = %e, "turn failed");
            self.state = SessionState::Idle;
            self.push(Role::Bot, error_message(e));
        }
        result
    }

    async fn instruct(
        &mut self,
        instruction: &str,
        generator: &dyn TaskGenerator,
        store: &dyn DatasetStore,
    ) -> WorkflowResult<TurnOutcome> {
        self.state = SessionState::AwaitingGeneration;

        let snapshot = store.snapshot().await?;
        let specs = generator.generate(instruction, &snapshot.columns).await?;
        let batch = TaskBatch::from_specs(&specs, &snapshot)?;
        if batch.is_empty() {
            return Err(WorkflowError::NoTasksGenerated);
        }

        let report = preview(&batch, &snapshot, self.preview_limit)?;
        info!(
            session = %self.id,
            tasks = batch.len(),
            matches = report.total_matches,
            "batch pending confirmation"
        );

        self.push(
            Role::Bot,
            format!(
                "Found {} matches. Showing up to {} previews:",
                report.total_matches, self.preview_limit
            ),
        );
        for entry in &report.entries {
            self.push(
                Role::Bot,
                format!(
                    "Row {}, Column {}: \"{}\" → \"{}\"",
                    entry.row, entry.column, entry.original, entry.modified
                ),
            );
        }
        if report.omitted > 0 {
            self.push(Role::Bot, format!("…and {} more matches not shown.", report.omitted));
        }
        self.push(Role::Bot, "Do you want to apply these changes? (Yes/No)");

        self.state = SessionState::AwaitingConfirmation(PendingBatch {
            instruction: instruction.to_string(),
            batch,
            preview: report.clone(),
        });
        Ok(TurnOutcome::Previewed(report))
    }

    async fn confirm(
        &mut self,
        reply: &str,
        pending: PendingBatch,
        store: &dyn DatasetStore,
    ) -> WorkflowResult<TurnOutcome> {
        match classify_confirmation(reply) {
            Confirmation::Affirmative => {
                let report = apply(&pending.batch, store, self.preview_limit).await?;
                info!(
                    session = %self.id,
                    replacements = report.total_replacements,
                    "pending batch applied"
                );

                self.push(
                    Role::Bot,
                    format!("✅ Replaced {} items successfully.", report.total_replacements),
                );
                for entry in &report.entries {
                    self.push(
                        Role::Bot,
                        format!(
                            "Row {}, Column {}: \"{}\" → \"{}\"",
                            entry.row, entry.column, entry.from, entry.to
                        ),
                    );
                }
                if report.omitted > 0 {
                    let more = format!("…and {} more replacements not shown.", report.omitted);
                    self.push(Role::Bot, more);
                }
                Ok(TurnOutcome::Applied(report))
            }
            kind => {
                debug!(session = %self.id, ?kind, "pending batch discarded");
                self.push(Role::Bot, "Operation canceled. No changes were made.");
                Ok(TurnOutcome::Cancelled)
            }
        }
    }

    fn push(&mut self, role: Role, text: impl Into<String>) {
        let at = Utc::now();
        self.last_activity = at;
        self.messages.push(ChatMessage {
            role,
            text: text.into(),
            at,
        });
    }

    fn trim_history(&mut self) {
        let excess = self.messages.len().saturating_sub(MAX_HISTORY);
        if excess > 0 {
            self.messages.drain(..excess);
            self.dropped += excess;
        }
    }
}

/// User-facing text for a failed turn.
fn error_message(error: &WorkflowError) -> String {
    match error {
        WorkflowError::NoTasksGenerated => {
            "❌ Could not generate any tasks for that description.".to_string()
        }
        WorkflowError::Apply(e) => format!("⚠️ Replacement error: {}", e),
        other => format!("⚠️ Error: {}", other),
    }
}

// =============================================================================
// Session registry
// =============================================================================

pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// Live sessions by id.
///
/// Each session sits behind its own mutex, so turns of one session run one
/// at a time while different sessions proceed independently. Sessions idle
/// for longer than the TTL are evicted on the next lookup.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SharedSession>>,
    preview_limit: usize,
    idle_ttl: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_LIMIT)
    }
}

impl SessionManager {
    pub fn new(preview_limit: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            preview_limit,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Start a session under a fresh id.
    pub async fn create(&self) -> (String, SharedSession) {
        let id = Uuid::new_v4().to_string();
        let session = self.insert(&id).await;
        (id, session)
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Look up `id`, creating the session if it does not exist yet.
    pub async fn get_or_create(&self, id: Option<&str>) -> (String, SharedSession) {
        self.evict_idle(Utc::now()).await;
        match id {
            Some(id) => match self.get(id).await {
                Some(session) => (id.to_string(), session),
                None => (id.to_string(), self.insert(id).await),
            },
            None => self.create().await,
        }
    }

    /// End a session. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!(session = %id, "session ended");
        }
        removed
    }

    /// Drop sessions idle for longer than the TTL at `now`.
    ///
    /// Sessions in the middle of a turn are locked and kept.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(session) => !session.is_expired(now, self.idle_ttl),
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "idle sessions evicted");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn insert(&self, id: &str) -> SharedSession {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session = %id, "session created");
                Arc::new(Mutex::new(
                    ConversationSession::new(id).with_preview_limit(self.preview_limit),
                ))
            })
            .clone()
    }
}
