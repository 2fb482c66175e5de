//! Change Notification
//!
//! [`ChangeNotifier`] is the member-changed event source a bindable object
//! may expose. Events carry the changed member's name; handlers are
//! fallible so an unhandled rule fault propagates back to the mutation
//! site that raised the event.
//!
//! Handlers are invoked outside the internal lock: a handler is allowed to
//! subscribe or unsubscribe on the same notifier (watcher re-attachment
//! does exactly that).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::BindingError;

/// Identifier for a registered handler, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Generate a new unique handler ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked with the name of the member that changed.
pub type ChangeHandler = Arc<dyn Fn(&str) -> Result<(), BindingError> + Send + Sync>;

/// Member-changed event source.
#[derive(Default)]
pub struct ChangeNotifier {
    handlers: RwLock<Vec<(HandlerId, ChangeHandler)>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns the id to unsubscribe with.
    pub fn subscribe(&self, handler: ChangeHandler) -> HandlerId {
        let id = HandlerId::next();
        self.handlers.write().push((id, handler));
        id
    }

    /// Remove a previously registered handler. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: HandlerId) {
        self.handlers.write().retain(|(h, _)| *h != id);
    }

    /// Notify every handler that `member` changed.
    ///
    /// The first handler error stops the dispatch and propagates to the
    /// caller (typically the setter that raised the event).
    pub fn raise(&self, member: &str) -> Result<(), BindingError> {
        let handlers: Vec<ChangeHandler> = {
            let guard = self.handlers.read();
            guard.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in handlers {
            handler(member)?;
        }
        Ok(())
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn raise_invokes_handlers_with_member_name() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        notifier.subscribe(Arc::new(move |member| {
            assert_eq!(member, "int");
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        notifier.raise("int").unwrap();
        notifier.raise("int").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let id = notifier.subscribe(Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert_eq!(notifier.handler_count(), 1);

        notifier.raise("x").unwrap();
        notifier.unsubscribe(id);
        notifier.raise("x").unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.handler_count(), 0);
    }

    #[test]
    fn handler_may_resubscribe_during_raise() {
        let notifier = Arc::new(ChangeNotifier::new());
        let notifier_clone = notifier.clone();

        notifier.subscribe(Arc::new(move |_| {
            // Reentrant registration must not deadlock.
            let id = notifier_clone.subscribe(Arc::new(|_| Ok(())));
            notifier_clone.unsubscribe(id);
            Ok(())
        }));

        notifier.raise("x").unwrap();
        assert_eq!(notifier.handler_count(), 1);
    }

    #[test]
    fn handler_error_stops_dispatch() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(AtomicI32::new(0));

        notifier.subscribe(Arc::new(|_| {
            Err(crate::error::EvalError::Invalid("boom".into()).into())
        }));
        let count_clone = count.clone();
        notifier.subscribe(Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert!(notifier.raise("x").is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
