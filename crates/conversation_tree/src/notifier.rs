//! Change notification for conversation trees.
//!
//! Subscribers are plain callbacks invoked synchronously, in subscription
//! order, after every successful mutation. While callbacks run the notifier is
//! marked as dispatching and every mutating entry point of the tree (and of
//! the `ConversationManager`) fails fast with `ReentrantMutation`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::structs::events::TreeChange;

type ChangeCallback = Arc<dyn Fn(&TreeChange) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<(u64, ChangeCallback)>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct ChangeNotifier {
    registry: Arc<Mutex<Registry>>,
    dispatching: DispatchState,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TreeChange) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.push((id, Arc::new(callback)));

        tracing::debug!(
            subscription_id = id,
            subscriber_count = registry.subscribers.len(),
            "ChangeNotifier: Subscriber added"
        );

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching.is_dispatching()
    }

    /// Shares the dispatch flag with holders outside the tree.
    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatching.clone()
    }

    /// Delivers `change` to every subscriber.
    ///
    /// The subscriber list is snapshotted first, so callbacks may subscribe
    /// or unsubscribe without deadlocking; such changes apply from the next
    /// notification on.
    pub(crate) fn notify(&self, change: &TreeChange) {
        let callbacks: Vec<ChangeCallback> = lock(&self.registry)
            .subscribers
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        tracing::debug!(
            tree_id = %change.tree_id,
            operation = change.operation.name(),
            subscriber_count = callbacks.len(),
            "ChangeNotifier: Dispatching change"
        );

        let _scope = self.dispatching.enter();
        for callback in callbacks {
            callback(change);
        }
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .field("dispatching", &self.is_dispatching())
            .finish()
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping it keeps the subscription alive; call `unsubscribe` to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the callback. Returns false if the notifier is gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(id, _)| *id != self.id);
        let removed = registry.subscribers.len() < before;
        tracing::debug!(
            subscription_id = self.id,
            removed,
            "ChangeNotifier: Subscriber removed"
        );
        removed
    }
}

/// Shared "callbacks are running" flag.
#[derive(Clone, Debug, Default)]
pub struct DispatchState(Arc<AtomicBool>);

impl DispatchState {
    pub fn is_dispatching(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> DispatchScope<'_> {
        self.0.store(true, Ordering::SeqCst);
        DispatchScope(&self.0)
    }
}

/// Clears the flag on drop, including when a callback panics.
struct DispatchScope<'a>(&'a AtomicBool);

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::events::TreeOperation;
    use crate::structs::navigation::NavigationState;
    use uuid::Uuid;

    fn change() -> TreeChange {
        let node_id = Uuid::new_v4();
        TreeChange::new(
            Uuid::new_v4(),
            TreeOperation::CursorMoved {
                from: node_id,
                to: node_id,
            },
            NavigationState {
                current_node_id: node_id,
                current_branch: None,
                available_branches: Vec::new(),
                can_go_back: false,
                can_go_forward: false,
                breadcrumbs: Vec::new(),
            },
        )
    }

    #[test]
    fn delivers_in_subscription_order() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            notifier.subscribe(move |_| seen.lock().unwrap().push(label));
        }
        notifier.notify(&change());

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let subscription = notifier.subscribe(move |_| *counter.lock().unwrap() += 1);

        notifier.notify(&change());
        assert!(subscription.unsubscribe());
        notifier.notify(&change());

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(!notifier.has_subscribers());
    }

    #[test]
    fn unsubscribe_after_notifier_dropped_returns_false() {
        let notifier = ChangeNotifier::new();
        let subscription = notifier.subscribe(|_| {});
        drop(notifier);
        assert!(!subscription.unsubscribe());
    }

    #[test]
    fn dispatch_flag_is_set_only_during_callbacks() {
        let notifier = ChangeNotifier::new();
        let state = notifier.dispatch_state();
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let inner_state = state.clone();
        notifier.subscribe(move |_| *sink.lock().unwrap() = Some(inner_state.is_dispatching()));

        assert!(!state.is_dispatching());
        notifier.notify(&change());

        assert_eq!(*observed.lock().unwrap(), Some(true));
        assert!(!state.is_dispatching());
    }
}
