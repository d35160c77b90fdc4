//! In-process conversation history keyed by session id.
//!
//! The session map sits behind a `std::sync::RwLock` that is only held for
//! lookups and inserts, never across an `.await`. Each session has its own
//! `tokio::sync::Mutex`, so requests for different sessions proceed
//! independently while requests for the same session are serialized.
//!
//! History grows without bound for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::Turn;

type SessionTurns = Arc<Mutex<Vec<Turn>>>;

#[derive(Debug, Default)]
pub struct ConversationStore {
    sessions: RwLock<HashMap<String, SessionTurns>>,
}

/// Exclusive access to one session's history.
///
/// Held by the chat service for a whole question/answer exchange so that
/// the history it reads and the turn it appends stay consistent.
pub struct SessionGuard {
    session_id: String,
    turns: OwnedMutexGuard<Vec<Turn>>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The last `max_turns` turns, oldest first.
    pub fn recent(&self, max_turns: usize) -> Vec<Turn> {
        let start = self.turns.len().saturating_sub(max_turns);
        self.turns[start..].to_vec()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, session_id: &str) -> Option<SessionTurns> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    fn get_or_create(&self, session_id: &str) -> SessionTurns {
        if let Some(s) = self.existing(session_id) {
            return s;
        }
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Locks a session for exclusive use, creating it if absent.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let turns = self.get_or_create(session_id).lock_owned().await;
        SessionGuard {
            session_id: session_id.to_string(),
            turns,
        }
    }

    /// Appends a turn, creating the session if absent.
    pub async fn append(&self, session_id: &str, turn: Turn) {
        self.lock(session_id).await.append(turn);
    }

    /// The last `max_turns` turns, oldest first. Unknown sessions yield an
    /// empty history and are not created.
    pub async fn recent(&self, session_id: &str, max_turns: usize) -> Vec<Turn> {
        match self.existing(session_id) {
            Some(s) => {
                let turns = s.lock().await;
                let start = turns.len().saturating_sub(max_turns);
                turns[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Clears a session's history.
    pub async fn reset(&self, session_id: &str) {
        if let Some(s) = self.existing(session_id) {
            s.lock().await.clear();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
