use std::sync::Arc;

use crate::optimistic::MutationPhase;

/// Events emitted by the console and the optimistic executor
///
/// Observers use these to show transient notifications and to trace the
/// lifecycle of remote mutations.
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    // ===== Mutation Lifecycle =====
    /// An optimistic mutation moved to a new phase
    MutationPhaseChanged {
        /// Human-readable mutation label
        label: String,
        /// The phase just entered
        phase: MutationPhase,
    },

    /// A remote mutation failed and local state was rolled back
    ///
    /// Not emitted for silent mutations.
    MutationFailed {
        /// Human-readable mutation label
        label: String,
        /// Error message from the remote call
        error: String,
    },

    /// The post-mutation refresh failed; the mutation itself stands
    RefreshFailed {
        /// Human-readable mutation label
        label: String,
        /// Error message from the refresh call
        error: String,
    },

    // ===== Configuration =====
    /// The console read a fresh configuration snapshot
    ConfigLoaded {
        /// Revision hash reported by the gateway
        hash: Option<String>,
        /// Number of agents known to the gateway
        agent_count: usize,
    },
}

impl ConsoleEvent {
    /// Text suitable for a user-visible notification, if this event warrants one
    pub fn notification(&self) -> Option<String> {
        match self {
            ConsoleEvent::MutationFailed { label, error } => {
                Some(format!("{} failed: {}", label, error))
            }
            _ => None,
        }
    }
}

/// Hook for observing console events
pub trait ConsoleHook: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &ConsoleEvent);
}

/// Blanket implementation for closures
impl<F> ConsoleHook for F
where
    F: Fn(&ConsoleEvent) + Send + Sync,
{
    fn on_event(&self, event: &ConsoleEvent) {
        self(event)
    }
}

/// A shared list of hooks that can be cloned into detached tasks.
#[derive(Clone, Default)]
pub struct Hooks {
    inner: Arc<parking_lot::RwLock<Vec<Arc<dyn ConsoleHook>>>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hook: impl ConsoleHook + 'static) {
        self.inner.write().push(Arc::new(hook));
    }

    pub fn add_shared(&self, hook: Arc<dyn ConsoleHook>) {
        self.inner.write().push(hook);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Emit an event to all registered hooks
    pub fn emit(&self, event: ConsoleEvent) {
        let hooks = self.inner.read();
        for hook in hooks.iter() {
            hook.on_event(&event);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").field("len", &self.len()).finish()
    }
}
