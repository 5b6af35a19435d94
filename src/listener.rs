//! Per-key cache invalidation listeners.
//!
//! Callbacks fire synchronously on the thread that calls [`CacheListenerHolder::call`],
//! which for a store is the task completing the write. They must not block.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A callback receiving the newly stored value.
pub type Listener<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<V, F>(f: F) -> Listener<V>
where
    F: Fn(&V) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry mapping a key to the listeners interested in it.
///
/// Entries are created on first registration and live as long as the holder.
pub struct CacheListenerHolder<K, V> {
    listeners: Mutex<HashMap<K, Vec<Listener<V>>>>,
}

impl<K, V> CacheListenerHolder<K, V>
where
    K: Eq + Hash,
{
    /// Holder without listeners.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register `listener` for `key`. `None` is ignored.
    pub fn add_listener(&self, key: K, listener: Option<Listener<V>>) {
        if let Some(listener) = listener {
            self.listeners.lock().entry(key).or_default().push(listener);
        }
    }

    /// Invoke every listener registered for `key`, in registration order.
    pub fn call(&self, key: &K, value: &V) {
        // Snapshot so callbacks may register listeners without deadlocking.
        let registered = match self.listeners.lock().get(key) {
            Some(registered) => registered.clone(),
            None => return,
        };
        for listener in registered {
            listener(value);
        }
    }

    /// Number of listeners registered for `key`.
    pub fn listener_count(&self, key: &K) -> usize {
        self.listeners.lock().get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl<K, V> Default for CacheListenerHolder<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_call_in_registration_order() {
        let holder: CacheListenerHolder<&str, u32> = CacheListenerHolder::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            holder.add_listener("k", Some(listener(move |v: &u32| seen.lock().push((tag, *v)))));
        }

        holder.call(&"k", &7);
        assert_eq!(
            *seen.lock(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_call_only_matching_key() {
        let holder: CacheListenerHolder<String, u32> = CacheListenerHolder::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        holder.add_listener(
            "a".to_string(),
            Some(listener(move |_: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        holder.call(&"b".to_string(), &1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        holder.call(&"a".to_string(), &1);
        holder.call(&"a".to_string(), &2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_absent_listener_is_ignored() {
        let holder: CacheListenerHolder<u8, u8> = CacheListenerHolder::new();
        holder.add_listener(1, None);

        assert!(holder.is_empty());
        assert_eq!(holder.listener_count(&1), 0);
        holder.call(&1, &0);
    }

    #[test]
    fn test_listener_may_register_during_call() {
        let holder: Arc<CacheListenerHolder<u8, u8>> = Arc::new(CacheListenerHolder::new());
        let inner = holder.clone();
        holder.add_listener(
            1,
            Some(listener(move |_: &u8| inner.add_listener(1, Some(listener(|_: &u8| {}))))),
        );

        holder.call(&1, &0);
        assert_eq!(holder.listener_count(&1), 2);
    }
}
