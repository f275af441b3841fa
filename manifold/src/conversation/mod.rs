//! Process-wide conversation memory.
//!
//! One [`ConversationStore`] is shared by every tool invocation in the
//! process. Threads are addressed by UUID (`continuation_id` on the wire),
//! bounded by a turn cap and a TTL, and evicted LRU-style beyond a total
//! cap. Locking discipline: the map lock covers insert/delete/lookup only;
//! each thread has its own lock serialising appends. Lock order is always
//! map then entry, and the map lock is released before an entry lock is
//! taken.

mod thread;

pub use thread::{ConversationThread, Role, ThreadError, Turn};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::settings::ServerSettings;
use crate::tokens::estimate_tokens;
use thread::unix_now;

/// Bounds for the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum turns per thread (one user + one assistant = 2 turns).
    pub max_turns: usize,
    /// Idle lifetime before a thread expires.
    pub ttl: Duration,
    /// Total thread cap; exceeding it evicts least-recently-touched.
    pub max_threads: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            ttl: Duration::from_secs(5 * 3600),
            max_threads: 1000,
        }
    }
}

impl StoreConfig {
    /// Derive the store bounds from server settings.
    #[must_use]
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            max_turns: settings.max_conversation_turns,
            ttl: settings.conversation_timeout,
            ..Self::default()
        }
    }
}

/// What a garbage-collection pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Threads removed because their TTL elapsed.
    pub expired: usize,
    /// Threads removed by the LRU cap.
    pub evicted: usize,
}

/// The thread store.
#[derive(Debug)]
pub struct ConversationStore {
    config: StoreConfig,
    threads: Mutex<HashMap<Uuid, Arc<Mutex<ConversationThread>>>>,
}

impl ConversationStore {
    /// An empty store with the given bounds.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// The configured bounds.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of live threads.
    pub async fn len(&self) -> usize {
        self.threads.lock().await.len()
    }

    /// Whether the store holds no threads.
    pub async fn is_empty(&self) -> bool {
        self.threads.lock().await.is_empty()
    }

    /// Create a thread seeded with `initial` and return its id.
    pub async fn create_thread(
        &self,
        tool_name: &str,
        initial: Turn,
        parent_id: Option<Uuid>,
    ) -> Uuid {
        let mut thread = ConversationThread::new(tool_name, parent_id);
        thread.absorb_files(&initial);
        thread.turns.push(initial);
        let id = thread.id;
        {
            let mut threads = self.threads.lock().await;
            threads.insert(id, Arc::new(Mutex::new(thread)));
        }
        // Keep the total under the cap; the new thread is the most recent
        // and never the eviction victim.
        self.enforce_thread_cap().await;
        id
    }

    /// Append a turn, returning the new turn count.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Unknown`], [`ThreadError::Expired`] (the thread is
    /// removed), or [`ThreadError::Full`].
    pub async fn append_turn(&self, id: Uuid, turn: Turn) -> Result<usize, ThreadError> {
        let entry = self.entry(id).await?;
        let mut thread = entry.lock().await;
        if self.is_expired(&thread) {
            drop(thread);
            self.remove(id).await;
            return Err(ThreadError::Expired(id));
        }
        if thread.turns.len() >= self.config.max_turns {
            return Err(ThreadError::Full {
                id,
                max: self.config.max_turns,
            });
        }
        thread.absorb_files(&turn);
        thread.turns.push(turn);
        thread.touch();
        Ok(thread.turns.len())
    }

    /// A point-in-time copy of the thread.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Unknown`] or [`ThreadError::Expired`].
    pub async fn snapshot(&self, id: Uuid) -> Result<ConversationThread, ThreadError> {
        let entry = self.entry(id).await?;
        let thread = entry.lock().await;
        if self.is_expired(&thread) {
            drop(thread);
            self.remove(id).await;
            return Err(ThreadError::Expired(id));
        }
        Ok(thread.clone())
    }

    /// Reconstruct history for prompt building: the most recent turns that
    /// fit in `budget_tokens`, with the first user turn always anchored.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Unknown`] or [`ThreadError::Expired`].
    pub async fn reconstruct(
        &self,
        id: Uuid,
        budget_tokens: u64,
    ) -> Result<Vec<Turn>, ThreadError> {
        let thread = self.snapshot(id).await?;
        Ok(reconstruct_turns(&thread.turns, budget_tokens))
    }

    /// Persist opaque workflow state inside the thread.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Unknown`] or [`ThreadError::Expired`].
    pub async fn set_workflow_state(
        &self,
        id: Uuid,
        state: serde_json::Value,
    ) -> Result<(), ThreadError> {
        let entry = self.entry(id).await?;
        let mut thread = entry.lock().await;
        if self.is_expired(&thread) {
            drop(thread);
            self.remove(id).await;
            return Err(ThreadError::Expired(id));
        }
        thread.workflow_state = Some(state);
        thread.touch();
        Ok(())
    }

    /// The workflow state stored in the thread, if any.
    ///
    /// # Errors
    ///
    /// [`ThreadError::Unknown`] or [`ThreadError::Expired`].
    pub async fn workflow_state(&self, id: Uuid) -> Result<Option<serde_json::Value>, ThreadError> {
        Ok(self.snapshot(id).await?.workflow_state)
    }

    /// Remove expired threads and enforce the LRU cap.
    pub async fn gc(&self) -> GcStats {
        let mut stats = GcStats::default();
        let entries: Vec<(Uuid, Arc<Mutex<ConversationThread>>)> = {
            let threads = self.threads.lock().await;
            threads.iter().map(|(id, e)| (*id, Arc::clone(e))).collect()
        };
        let cutoff = unix_now() - self.config.ttl.as_secs_f64();
        let mut expired = Vec::new();
        for (id, entry) in entries {
            let thread = entry.lock().await;
            if thread.last_touched_at < cutoff {
                expired.push(id);
            }
        }
        {
            let mut threads = self.threads.lock().await;
            for id in &expired {
                threads.remove(id);
            }
        }
        stats.expired = expired.len();
        stats.evicted = self.enforce_thread_cap().await;
        if stats != GcStats::default() {
            tracing::debug!(expired = stats.expired, evicted = stats.evicted, "conversation gc");
        }
        stats
    }

    async fn entry(&self, id: Uuid) -> Result<Arc<Mutex<ConversationThread>>, ThreadError> {
        self.threads
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(ThreadError::Unknown(id))
    }

    async fn remove(&self, id: Uuid) {
        self.threads.lock().await.remove(&id);
    }

    fn is_expired(&self, thread: &ConversationThread) -> bool {
        unix_now() - thread.last_touched_at > self.config.ttl.as_secs_f64()
    }

    /// Evict least-recently-touched threads while over the cap. Returns the
    /// number evicted.
    async fn enforce_thread_cap(&self) -> usize {
        let over = {
            let threads = self.threads.lock().await;
            threads.len().saturating_sub(self.config.max_threads)
        };
        if over == 0 {
            return 0;
        }
        let mut stamped: Vec<(Uuid, f64)> = Vec::new();
        {
            let threads = self.threads.lock().await;
            for (id, entry) in threads.iter() {
                // Snapshot timestamps without holding the map lock across
                // awaits on entry locks.
                if let Ok(thread) = entry.try_lock() {
                    stamped.push((*id, thread.last_touched_at));
                }
            }
        }
        stamped.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let victims: Vec<Uuid> = stamped.into_iter().take(over).map(|(id, _)| id).collect();
        let mut threads = self.threads.lock().await;
        let mut evicted = 0;
        for id in victims {
            if threads.remove(&id).is_some() {
                evicted += 1;
            }
        }
        evicted
    }
}

/// Select the suffix of `turns` that fits `budget_tokens`, always keeping
/// the first user turn as the context anchor. Returns at least one turn
/// whenever `turns` is non-empty.
#[must_use]
pub fn reconstruct_turns(turns: &[Turn], budget_tokens: u64) -> Vec<Turn> {
    if turns.is_empty() {
        return Vec::new();
    }
    let anchor_idx = turns.iter().position(|t| t.role == Role::User);
    let anchor_cost = anchor_idx.map_or(0, |i| estimate_tokens(&turns[i].content));

    let mut used = anchor_cost;
    let mut start = turns.len();
    for (i, turn) in turns.iter().enumerate().rev() {
        if Some(i) == anchor_idx {
            // Already reserved; extend the suffix over it for free.
            start = i;
            continue;
        }
        let cost = estimate_tokens(&turn.content);
        if used + cost > budget_tokens {
            break;
        }
        used += cost;
        start = i;
    }

    let mut result = Vec::new();
    if let Some(anchor) = anchor_idx
        && anchor < start
    {
        result.push(turns[anchor].clone());
    }
    result.extend(turns[start..].iter().cloned());
    if result.is_empty() {
        // Nothing fit and there was no user anchor; the most recent turn
        // still goes out so callers never lose the thread entirely.
        result.push(turns[turns.len() - 1].clone());
    }
    result
}
