//! Conversation History
//!
//! Message turns per user for the chat-completion backend, which has no remote memory.
//! Stored as one JSON document (`user_id -> [turn, ...]`) with a rolling window.

use crate::backend::Turn;
use crate::store::{self, StoreError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Maximum turns to keep per user (rolling window)
pub const MAX_TURNS_PER_USER: usize = 50;

type Histories = BTreeMap<String, Vec<Turn>>;

pub struct HistoryStore {
    path: PathBuf,
    histories: Mutex<Histories>,
    max_turns: usize,
}

impl HistoryStore {
    /// Open or create the history document
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_limit(path, MAX_TURNS_PER_USER)
    }

    /// Open with a custom window. The window holds whole exchanges, so an odd limit is
    /// rounded down (never below one exchange).
    pub fn open_with_limit(path: &Path, max_turns: usize) -> Result<Self, StoreError> {
        let histories: Histories = store::load(path)?;
        info!(
            "History store opened: {} ({} users)",
            path.display(),
            histories.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            histories: Mutex::new(histories),
            max_turns: (max_turns - max_turns % 2).max(2),
        })
    }

    /// Oldest-first turns for a user
    pub fn history(&self, user_id: &str) -> Vec<Turn> {
        self.histories
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Add a complete exchange (user message + assistant response) atomically.
    /// On a failed write the in-memory history is left as it was.
    pub fn add_exchange(
        &self,
        user_id: &str,
        user_msg: &str,
        assistant_msg: &str,
    ) -> Result<(), StoreError> {
        let mut histories = self.histories.lock();
        let previous = histories.get(user_id).cloned();

        let turns = histories.entry(user_id.to_string()).or_default();
        turns.push(Turn::user(user_msg));
        turns.push(Turn::assistant(assistant_msg));
        if turns.len() > self.max_turns {
            let excess = turns.len() - self.max_turns;
            turns.drain(..excess);
        }

        if let Err(e) = store::save(&self.path, &*histories) {
            match previous {
                Some(prev) => {
                    histories.insert(user_id.to_string(), prev);
                }
                None => {
                    histories.remove(user_id);
                }
            }
            return Err(e);
        }

        debug!("Stored exchange for user {}", user_id);
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Role;
    use tempfile::TempDir;

    #[test]
    fn test_exchange_is_ordered() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(&dir.path().join("histories.json")).unwrap();

        store.add_exchange("42", "What's 2+2?", "4").unwrap();
        store.add_exchange("42", "And 3+3?", "6").unwrap();

        let history = store.history("42");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], Turn::user("What's 2+2?"));
        assert_eq!(history[3].role, Role::Assistant);
        assert_eq!(history[3].content, "6");
        assert!(store.history("7").is_empty());
    }

    #[test]
    fn test_rolling_window() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open_with_limit(&dir.path().join("h.json"), 4).unwrap();

        for i in 0..5 {
            store
                .add_exchange("42", &format!("q{}", i), &format!("a{}", i))
                .unwrap();
        }

        let history = store.history("42");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q3");
        assert_eq!(history[3].content, "a4");
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("histories.json");
        {
            let store = HistoryStore::open(&path).unwrap();
            store.add_exchange("42", "Hello", "Hi!").unwrap();
        }

        let store = HistoryStore::open(&path).unwrap();
        assert_eq!(store.history("42").len(), 2);
    }

    #[test]
    fn test_odd_limit_keeps_whole_exchanges() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open_with_limit(&dir.path().join("h.json"), 5).unwrap();

        for i in 0..4 {
            store
                .add_exchange("42", &format!("q{}", i), &format!("a{}", i))
                .unwrap();
        }

        let history = store.history("42");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], Turn::user("q2"));
        assert_eq!(history[3], Turn::assistant("a3"));
    }

    #[test]
    fn test_failed_write_leaves_history_untouched() {
        let dir = TempDir::new().unwrap();
        // A regular file where a directory should be makes every save fail
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = HistoryStore {
            path: blocker.join("histories.json"),
            histories: Mutex::new(Histories::new()),
            max_turns: MAX_TURNS_PER_USER,
        };

        assert!(store.add_exchange("42", "Hello", "Hi!").is_err());
        assert!(store.history("42").is_empty());
    }
}
