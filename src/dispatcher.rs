//! Message identifier to handler routing.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

/// A message handler.
///
/// Invoked synchronously from a connection's read loop with the agent that
/// received the message and the message payload.
pub type Handler<A> = Arc<dyn Fn(&A, Bytes) + Send + Sync>;

/// Routing table from message identifier to handler.
///
/// Lookups take a shared lock, so many connection loops can dispatch at the
/// same time; registration takes the exclusive lock briefly.
pub struct Dispatcher<K, A> {
    handlers: RwLock<HashMap<K, Handler<A>>>,
}

impl<K, A> Dispatcher<K, A>
where
    K: Eq + Hash,
{
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Install the handler for `id`, replacing any previous one.
    pub fn reg_handler<F>(&self, id: K, handler: F)
    where
        F: Fn(&A, Bytes) + Send + Sync + 'static,
    {
        self.handlers.write().insert(id, Arc::new(handler));
    }

    /// Look up the handler registered for `id`.
    pub fn handler(&self, id: &K) -> Option<Handler<A>> {
        self.handlers.read().get(id).cloned()
    }

    /// Number of registered identifiers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, A> Default for Dispatcher<K, A>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A> fmt::Debug for Dispatcher<K, A>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("Dispatcher")
            .field("ids", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
