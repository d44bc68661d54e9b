//! Optimistic mutations against a remote source of truth.
//!
//! A mutation applies its change to local state first, then awaits the remote
//! call. On success the change stands and an optional refresh reconciles local
//! state with the remote. On failure the local change is rolled back. The
//! executor never returns an error: failures surface as `None`, an optional
//! callback and a [`ConsoleEvent::MutationFailed`] event.
//!
//! ```text
//! Idle -> Applied -> Confirmed [-> Refreshing -> Confirmed]
//!                 \-> RolledBack
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::events::{ConsoleEvent, Hooks};

/// Phase of a single mutation invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    Idle,
    Applied,
    Confirmed,
    Refreshing,
    RolledBack,
}

impl MutationPhase {
    /// True for phases a mutation can end in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationPhase::Confirmed | MutationPhase::RolledBack)
    }
}

impl std::fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationPhase::Idle => "idle",
            MutationPhase::Applied => "applied",
            MutationPhase::Confirmed => "confirmed",
            MutationPhase::Refreshing => "refreshing",
            MutationPhase::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

/// Capture the "before" state of a slice of local state for a rollback closure.
///
/// The copy is only as deep as `T::clone`. Snapshot just the part of state the
/// mutation changes.
pub fn snapshot<T: Clone>(value: &T) -> T {
    value.clone()
}

/// Per-resource async locks for serializing overlapping mutations.
///
/// Hold the guard from before the "before" snapshot is taken until the
/// mutation (and its refresh) has finished.
#[derive(Clone, Default)]
pub struct MutationLocks {
    locks: Arc<parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MutationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Wait for exclusive access to every key in `keys`.
    ///
    /// Keys are taken in sorted order, so callers locking overlapping sets
    /// cannot deadlock each other.
    pub async fn acquire_all<S: AsRef<str>>(&self, keys: &[S]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        keys.sort_unstable();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    /// Drop entries nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

type Callback<'a> = Box<dyn FnOnce() + Send + 'a>;
type Mutate<'a, T, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;
type Refresh<'a, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<(), E>> + Send + 'a>;
type ErrorCallback<'a, E> = Box<dyn FnOnce(&E) + Send + 'a>;

/// A single optimistic mutation, configured with builder methods and consumed
/// by [`run`](Self::run).
pub struct OptimisticMutation<'a, T, E> {
    label: String,
    apply: Callback<'a>,
    rollback: Callback<'a>,
    mutate: Mutate<'a, T, E>,
    refresh: Option<Refresh<'a, E>>,
    on_error: Option<ErrorCallback<'a, E>>,
    silent: bool,
    hooks: Hooks,
}

impl<'a, T, E> OptimisticMutation<'a, T, E>
where
    T: Send + 'a,
    E: Display + Send + 'a,
{
    pub fn new<A, R, M>(label: impl Into<String>, apply: A, rollback: R, mutate: M) -> Self
    where
        A: FnOnce() + Send + 'a,
        R: FnOnce() + Send + 'a,
        M: FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a,
    {
        Self {
            label: label.into(),
            apply: Box::new(apply),
            rollback: Box::new(rollback),
            mutate: Box::new(mutate),
            refresh: None,
            on_error: None,
            silent: false,
            hooks: Hooks::new(),
        }
    }

    /// Reconcile local state with the remote after a successful mutation.
    pub fn with_refresh<F>(mut self, refresh: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'a, Result<(), E>> + Send + 'a,
    {
        self.refresh = Some(Box::new(refresh));
        self
    }

    /// Called with the error after a failed mutation has been rolled back.
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: FnOnce(&E) + Send + 'a,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Suppress the user-visible failure event.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run the mutation. Returns the remote result, or `None` after a rollback.
    pub async fn run(self) -> Option<T> {
        let OptimisticMutation {
            label,
            apply,
            rollback,
            mutate,
            refresh,
            on_error,
            silent,
            hooks,
        } = self;
        let phase = |phase: MutationPhase| {
            log::debug!("Mutation '{}' -> {}", label, phase);
            hooks.emit(ConsoleEvent::MutationPhaseChanged {
                label: label.clone(),
                phase,
            });
        };

        apply();
        phase(MutationPhase::Applied);

        match mutate().await {
            Ok(value) => {
                phase(MutationPhase::Confirmed);
                if let Some(refresh) = refresh {
                    phase(MutationPhase::Refreshing);
                    if let Err(e) = refresh().await {
                        log::warn!("Refresh after '{}' failed: {}", label, e);
                        hooks.emit(ConsoleEvent::RefreshFailed {
                            label: label.clone(),
                            error: e.to_string(),
                        });
                    }
                    phase(MutationPhase::Confirmed);
                }
                Some(value)
            }
            Err(e) => {
                rollback();
                phase(MutationPhase::RolledBack);
                log::warn!("Mutation '{}' failed: {}", label, e);
                if let Some(on_error) = on_error {
                    on_error(&e);
                }
                if !silent {
                    hooks.emit(ConsoleEvent::MutationFailed {
                        label: label.clone(),
                        error: e.to_string(),
                    });
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Hooks, Arc<parking_lot::Mutex<Vec<ConsoleEvent>>>) {
        let hooks = Hooks::new();
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = events.clone();
        hooks.add(move |event: &ConsoleEvent| sink.lock().push(event.clone()));
        (hooks, events)
    }

    fn phases(events: &[ConsoleEvent]) -> Vec<MutationPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                ConsoleEvent::MutationPhaseChanged { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back() {
        let state = Arc::new(parking_lot::Mutex::new("original".to_string()));
        let (s1, s2) = (state.clone(), state.clone());
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let (hooks, events) = recorder();

        let result: Option<()> = OptimisticMutation::new(
            "Save",
            move || *s1.lock() = "optimistic".to_string(),
            move || *s2.lock() = "original".to_string(),
            || async { Err::<(), String>("boom".to_string()) }.boxed(),
        )
        .on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .with_hooks(hooks)
        .run()
        .await;

        assert!(result.is_none());
        assert_eq!(*state.lock(), "original");
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        let events = events.lock();
        assert_eq!(
            phases(&events),
            vec![MutationPhase::Applied, MutationPhase::RolledBack]
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, ConsoleEvent::MutationFailed { error, .. } if error == "boom")));
    }

    #[tokio::test]
    async fn test_successful_mutation_refreshes() {
        let state = Arc::new(parking_lot::Mutex::new(0));
        let (apply_state, refresh_state) = (state.clone(), state.clone());
        let (hooks, events) = recorder();

        let result = OptimisticMutation::new(
            "Increment",
            move || *apply_state.lock() += 1,
            || panic!("rollback must not run"),
            || async { Ok::<_, String>(42) }.boxed(),
        )
        .with_refresh(move || {
            async move {
                *refresh_state.lock() = 10;
                Ok(())
            }
            .boxed()
        })
        .with_hooks(hooks)
        .run()
        .await;

        assert_eq!(result, Some(42));
        assert_eq!(*state.lock(), 10);
        assert_eq!(
            phases(&events.lock()),
            vec![
                MutationPhase::Applied,
                MutationPhase::Confirmed,
                MutationPhase::Refreshing,
                MutationPhase::Confirmed
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_confirmed_outcome() {
        let (hooks, events) = recorder();
        let result = OptimisticMutation::new(
            "Save",
            || {},
            || panic!("rollback must not run"),
            || async { Ok::<_, String>("done") }.boxed(),
        )
        .with_refresh(|| async { Err("offline".to_string()) }.boxed())
        .with_hooks(hooks)
        .run()
        .await;

        assert_eq!(result, Some("done"));
        let events = events.lock();
        assert!(events
            .iter()
            .any(|e| matches!(e, ConsoleEvent::RefreshFailed { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ConsoleEvent::MutationFailed { .. })));
        assert_eq!(phases(&events).last(), Some(&MutationPhase::Confirmed));
    }

    #[tokio::test]
    async fn test_silent_mutation_emits_no_failure() {
        let (hooks, events) = recorder();
        let result: Option<()> = OptimisticMutation::new(
            "Quiet",
            || {},
            || {},
            || async { Err::<(), _>("nope".to_string()) }.boxed(),
        )
        .silent()
        .with_hooks(hooks)
        .run()
        .await;

        assert!(result.is_none());
        assert!(!events
            .lock()
            .iter()
            .any(|e| matches!(e, ConsoleEvent::MutationFailed { .. })));
    }

    #[tokio::test]
    async fn test_borrowed_local_state() {
        let mut value = parking_lot::Mutex::new(vec!["a".to_string()]);
        let before = snapshot(&*value.lock());

        let result: Option<()> = OptimisticMutation::new(
            "Borrowed",
            || value.lock().push("b".to_string()),
            || *value.lock() = before,
            || async { Err::<(), _>("nope".to_string()) }.boxed(),
        )
        .run()
        .await;

        assert!(result.is_none());
        assert_eq!(*value.get_mut(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_locks_serialize_same_key() {
        let locks = MutationLocks::new();
        let guard = locks.acquire("agent:a1").await;

        // A different key is not blocked
        let _other = locks.acquire("agent:a2").await;

        let blocked = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = blocked.acquire("agent:a1").await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_acquire_all_blocks_on_any_held_key() {
        let locks = MutationLocks::new();
        let single = locks.acquire("agent:b").await;

        let batch = locks.clone();
        let waiter = tokio::spawn(async move {
            let guards = batch.acquire_all(&["agent:c", "agent:b", "agent:a", "agent:c"]).await;
            guards.len()
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(single);
        assert_eq!(waiter.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_entries() {
        let locks = MutationLocks::new();
        let held = locks.acquire("agent:a1").await;
        drop(locks.acquire("agent:a2").await);

        locks.prune();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(MutationPhase::Confirmed.is_terminal());
        assert!(MutationPhase::RolledBack.is_terminal());
        assert!(!MutationPhase::Refreshing.is_terminal());
    }
}
