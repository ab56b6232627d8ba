//! Task-local connection store.
//!
//! Maps a logical task to at most one value, so nested operations within
//! one task can find the connection an outer scope already holds. A tokio
//! task is identified by its [`tokio::task::Id`]; code running outside a
//! task (for example the future driven by `block_on`) is identified by its
//! thread.
//!
//! Registration and removal happen only at scope boundaries: the scope that
//! registers a value records the returned [`TaskKey`] and removes the entry
//! under that key when it exits, even if it exits on another task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

/// Identity of a logical task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// A tokio task.
    Task(tokio::task::Id),
    /// Code running outside any tokio task.
    Thread(ThreadId),
}

impl TaskKey {
    /// Key of the currently running logical task.
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self::Task(id),
            None => Self::Thread(std::thread::current().id()),
        }
    }
}

/// Keyed store holding at most one value per logical task.
#[derive(Debug)]
pub struct TaskLocalStore<T> {
    enabled: AtomicBool,
    slots: Mutex<HashMap<TaskKey, T>>,
}

impl<T: Clone> TaskLocalStore<T> {
    /// Create an enabled store.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Create a disabled store.
    pub fn disabled() -> Self {
        let store = Self::new();
        store.disable();
        store
    }

    /// Enable lookups and registration.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        tracing::debug!("task-local store enabled");
    }

    /// Disable lookups and registration.
    ///
    /// Existing entries stay until their owners remove them, so scopes that
    /// registered before the switch still clean up.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        tracing::debug!("task-local store disabled");
    }

    /// Whether the store is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Value registered for the current task.
    pub fn get(&self) -> Option<T> {
        self.get_for(TaskKey::current())
    }

    /// Value registered for `key`.
    pub fn get_for(&self, key: TaskKey) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        self.slots.lock().get(&key).cloned()
    }

    /// Register `value` for the current task.
    ///
    /// Returns the key it was stored under, or `None` when the store is
    /// disabled or the task already has a value (which is left in place).
    pub fn register(&self, value: T) -> Option<TaskKey> {
        if !self.is_enabled() {
            return None;
        }
        let key = TaskKey::current();
        let mut slots = self.slots.lock();
        if slots.contains_key(&key) {
            return None;
        }
        slots.insert(key, value);
        Some(key)
    }

    /// Remove the entry under `key` if `matches` accepts it.
    pub fn remove_if(&self, key: TaskKey, matches: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut slots = self.slots.lock();
        if slots.get(&key).is_some_and(matches) {
            slots.remove(&key)
        } else {
            None
        }
    }

    /// Drop the current task's entry.
    pub fn reset(&self) -> Option<T> {
        self.slots.lock().remove(&TaskKey::current())
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        count
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl<T: Clone> Default for TaskLocalStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_once_per_task() {
        let store = TaskLocalStore::new();
        let key = store.register(1).unwrap();
        assert_eq!(store.register(2), None);
        assert_eq!(store.get(), Some(1));
        assert_eq!(store.remove_if(key, |v| *v == 2), None);
        assert_eq!(store.remove_if(key, |v| *v == 1), Some(1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_disabled_store_ignores_lookups() {
        let store = TaskLocalStore::new();
        store.register("a").unwrap();
        store.disable();
        assert_eq!(store.get(), None);
        assert_eq!(store.register("b"), None);
        assert_eq!(store.len(), 1);
        store.enable();
        assert_eq!(store.get(), Some("a"));
        assert_eq!(store.reset(), Some("a"));
    }

    #[tokio::test]
    async fn test_tasks_are_isolated() {
        let store = Arc::new(TaskLocalStore::new());
        store.register(0).unwrap();

        let inner = Arc::clone(&store);
        let seen = tokio::spawn(async move {
            let before = inner.get();
            inner.register(1).unwrap();
            (before, inner.get())
        })
        .await
        .unwrap();

        assert_eq!(seen, (None, Some(1)));
        assert_eq!(store.get(), Some(0));
        assert_eq!(store.len(), 2);
        assert_eq!(store.clear(), 2);
    }

    #[test]
    fn test_disabled_constructor() {
        let store = TaskLocalStore::<u8>::disabled();
        assert!(!store.is_enabled());
        assert_eq!(store.register(1), None);
    }
}
