//! In-memory thread store.
//!
//! A thread holds the conversation history and the session state of one
//! agent for one user. Turns on a thread are serialized through the thread's
//! turn lock; readers never wait for a running turn.

use std::collections::HashMap;
use std::sync::Arc;

use agrag_core::message::{Conversation, Message, ThreadId};
use agrag_core::session::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub struct Thread {
    pub agent: String,
    pub user_id: String,
    pub conversation: Conversation,
    pub state: SessionState,
    turn_lock: Arc<Mutex<()>>,
}

/// Why a thread could not be opened for a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// The id belongs to another user's thread.
    NotVisible,
    /// The thread was started with a different agent.
    OtherAgent(String),
    /// The store is full and every thread has a turn in flight.
    AtCapacity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: String,
    pub agent: String,
    pub last_update_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_title: Option<String>,
}

impl Thread {
    /// No turn or state patch holds or waits on the turn lock.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.turn_lock) == 1
    }
}

pub struct ThreadStore {
    capacity: usize,
    threads: RwLock<HashMap<String, Thread>>,
}

impl ThreadStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the thread `id` for a turn and return its turn lock.
    /// New threads start from `initial`. At capacity the least recently
    /// updated idle thread is evicted; busy threads are never evicted.
    pub async fn open(
        &self,
        id: &str,
        agent: &str,
        user_id: &str,
        initial: impl FnOnce() -> SessionState,
    ) -> Result<Arc<Mutex<()>>, OpenError> {
        let mut threads = self.threads.write().await;

        if let Some(thread) = threads.get(id) {
            if thread.user_id != user_id {
                return Err(OpenError::NotVisible);
            }
            if thread.agent != agent {
                return Err(OpenError::OtherAgent(thread.agent.clone()));
            }
            return Ok(thread.turn_lock.clone());
        }

        if threads.len() >= self.capacity {
            let oldest = threads
                .iter()
                .filter(|(_, t)| t.is_idle())
                .min_by_key(|(_, t)| t.conversation.updated_at)
                .map(|(k, _)| k.clone())
                .ok_or(OpenError::AtCapacity)?;
            debug!(thread_id = %oldest, "Evicting oldest thread");
            threads.remove(&oldest);
        }

        let lock = Arc::new(Mutex::new(()));
        threads.insert(
            id.to_string(),
            Thread {
                agent: agent.to_string(),
                user_id: user_id.to_string(),
                conversation: Conversation::with_id(ThreadId::from(id)),
                state: initial(),
                turn_lock: lock.clone(),
            },
        );
        Ok(lock)
    }

    /// The last `window` messages and a copy of the state, for a turn.
    pub async fn load(&self, id: &str, window: usize) -> Option<(Vec<Message>, SessionState)> {
        let threads = self.threads.read().await;
        threads
            .get(id)
            .map(|t| (t.conversation.recent(window).to_vec(), t.state.clone()))
    }

    /// Write a finished turn back. Returns false when the thread is gone.
    pub async fn commit(&self, id: &str, exchange: [Message; 2], state: SessionState) -> bool {
        let mut threads = self.threads.write().await;
        let Some(thread) = threads.get_mut(id) else {
            return false;
        };
        for message in exchange {
            thread.conversation.push(message);
        }
        thread.state = state;
        true
    }

    /// Threads of `user_id`, newest first.
    pub async fn list(&self, user_id: &str, agent: Option<&str>) -> Vec<ThreadSummary> {
        let threads = self.threads.read().await;
        let mut summaries: Vec<ThreadSummary> = threads
            .iter()
            .filter(|(_, t)| t.user_id == user_id)
            .filter(|(_, t)| agent.is_none_or(|a| t.agent == a))
            .map(|(id, t)| ThreadSummary {
                thread_id: id.clone(),
                agent: t.agent.clone(),
                last_update_time: t.conversation.updated_at,
                thread_title: t.conversation.title.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| b.last_update_time.cmp(&a.last_update_time));
        summaries
    }

    pub async fn messages(&self, id: &str, user_id: &str) -> Option<Vec<Message>> {
        let threads = self.threads.read().await;
        threads
            .get(id)
            .filter(|t| t.user_id == user_id)
            .map(|t| t.conversation.messages.clone())
    }

    pub async fn state(&self, id: &str, user_id: &str) -> Option<SessionState> {
        let threads = self.threads.read().await;
        threads
            .get(id)
            .filter(|t| t.user_id == user_id)
            .map(|t| t.state.clone())
    }

    /// Merge `patch` into the thread's values once no turn is running.
    pub async fn patch_state(
        &self,
        id: &str,
        user_id: &str,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<SessionState> {
        let lock = {
            let threads = self.threads.read().await;
            threads
                .get(id)
                .filter(|t| t.user_id == user_id)?
                .turn_lock
                .clone()
        };
        let _turn = lock.lock().await;

        let mut threads = self.threads.write().await;
        let thread = threads.get_mut(id)?;
        thread.state.merge_values(patch);
        Some(thread.state.clone())
    }

    pub async fn remove(&self, id: &str, user_id: &str) -> bool {
        let mut threads = self.threads.write().await;
        if threads.get(id).is_some_and(|t| t.user_id == user_id) {
            threads.remove(id);
            true
        } else {
            false
        }
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exchange(user: &str, assistant: &str) -> [Message; 2] {
        [Message::user(user), Message::assistant(assistant)]
    }

    #[tokio::test]
    async fn open_creates_once_with_initial_state() {
        let store = ThreadStore::new(10);
        let mut seeded = serde_json::Map::new();
        seeded.insert("pizza_created".into(), json!(false));

        store
            .open("t1", "pizzeria", "ana", || SessionState::with_values(seeded.clone()))
            .await
            .unwrap();
        store
            .open("t1", "pizzeria", "ana", || panic!("must not re-create"))
            .await
            .unwrap();

        let state = store.state("t1", "ana").await.unwrap();
        assert_eq!(state.value("pizza_created"), Some(&json!(false)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn other_users_and_agents_are_rejected() {
        let store = ThreadStore::new(10);
        store.open("t1", "iax_rag", "ana", SessionState::new).await.unwrap();

        assert_eq!(
            store.open("t1", "iax_rag", "bob", SessionState::new).await.err(),
            Some(OpenError::NotVisible)
        );
        assert_eq!(
            store.open("t1", "coder", "ana", SessionState::new).await.err(),
            Some(OpenError::OtherAgent("iax_rag".into()))
        );
        assert!(store.messages("t1", "bob").await.is_none());
        assert!(!store.remove("t1", "bob").await);
        assert!(store.remove("t1", "ana").await);
    }

    #[tokio::test]
    async fn commit_sets_title_and_history_window() {
        let store = ThreadStore::new(10);
        store.open("t1", "iax_rag", "ana", SessionState::new).await.unwrap();
        let long = "¿Cómo funciona el depósito en garantía de Workana para proyectos de precio fijo?";
        assert!(store.commit("t1", exchange(long, "Así."), SessionState::new()).await);
        assert!(store.commit("t1", exchange("¿Y por hora?", "Igual."), SessionState::new()).await);

        let list = store.list("ana", None).await;
        assert_eq!(list[0].thread_title.as_deref().map(|t| t.chars().count()), Some(60));

        let (history, _) = store.load("t1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "Así.");
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let store = ThreadStore::new(10);
        store.open("a", "iax_rag", "ana", SessionState::new).await.unwrap();
        store.open("b", "coder", "ana", SessionState::new).await.unwrap();
        store.open("c", "coder", "bob", SessionState::new).await.unwrap();
        store.commit("a", exchange("primero", "ok"), SessionState::new()).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.commit("b", exchange("segundo", "ok"), SessionState::new()).await;

        let all = store.list("ana", None).await;
        assert_eq!(
            all.iter().map(|t| t.thread_id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        let coder = store.list("ana", Some("coder")).await;
        assert_eq!(coder.len(), 1);
        assert_eq!(coder[0].thread_id, "b");
    }

    #[tokio::test]
    async fn evicts_oldest_at_capacity() {
        let store = ThreadStore::new(2);
        store.open("a", "x", "u", SessionState::new).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.open("b", "x", "u", SessionState::new).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.open("c", "x", "u", SessionState::new).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.state("a", "u").await.is_none());
        assert!(store.state("c", "u").await.is_some());
        // A turn finishing on an evicted thread is dropped.
        assert!(!store.commit("a", exchange("x", "y"), SessionState::new()).await);
    }

    #[tokio::test]
    async fn busy_threads_are_not_evicted() {
        let store = ThreadStore::new(1);
        let lock = store.open("t1", "x", "u", SessionState::new).await.unwrap();
        let running = lock.try_lock_owned().unwrap();

        assert_eq!(
            store.open("t2", "x", "u", SessionState::new).await.err(),
            Some(OpenError::AtCapacity)
        );

        // The same thread hands out the same lock, so a second turn waits.
        let again = store.open("t1", "x", "u", SessionState::new).await.unwrap();
        assert!(again.try_lock().is_err());

        drop(running);
        drop(again);
        store.open("t2", "x", "u", SessionState::new).await.unwrap();
        assert!(store.state("t1", "u").await.is_none());
        assert!(store.state("t2", "u").await.is_some());
    }

    #[tokio::test]
    async fn pending_turn_keeps_thread_from_eviction() {
        let store = ThreadStore::new(2);
        let pending = store.open("a", "x", "u", SessionState::new).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.open("b", "x", "u", SessionState::new).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.open("c", "x", "u", SessionState::new).await.unwrap();

        assert!(store.state("a", "u").await.is_some());
        assert!(store.state("b", "u").await.is_none());
        drop(pending);
    }

    #[tokio::test]
    async fn patch_waits_for_running_turn() {
        let store = Arc::new(ThreadStore::new(10));
        let lock = store.open("t1", "x", "u", SessionState::new).await.unwrap();
        let turn = lock.lock_owned().await;

        let patching = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut patch = serde_json::Map::new();
                patch.insert("name".into(), json!("Ana"));
                store.patch_state("t1", "u", &patch).await
            })
        };
        tokio::task::yield_now().await;
        assert!(!patching.is_finished());

        drop(turn);
        let state = patching.await.unwrap().unwrap();
        assert_eq!(state.value_text("name"), "Ana");
    }
}
