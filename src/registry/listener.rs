//! Deployment lifecycle notifications.
//!
//! A [`DeploymentListener`] is told about every deploy, failed deploy and
//! undeploy. Listeners that only become available after the registry is
//! running (a control-plane client, say) are wired through a
//! [`DeferredListener`]: events are queued until [`DeferredListener::activate`]
//! is called, replayed in order, and forwarded directly from then on.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::HostError;
use crate::forge::SpaceBundle;

/// Observer of registry changes. Called outside of any registry lock.
pub trait DeploymentListener: Send + Sync {
    /// `bundle` is now live for `space`.
    fn deployed(&self, space: &str, bundle: &Arc<SpaceBundle>);

    /// `space` was removed.
    fn undeployed(&self, space: &str);

    /// A deploy of `space` failed; the prior bundle (if any) is still live.
    fn failed(&self, space: &str, error: &HostError);
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl DeploymentListener for NoopListener {
    fn deployed(&self, _space: &str, _bundle: &Arc<SpaceBundle>) {}

    fn undeployed(&self, _space: &str) {}

    fn failed(&self, _space: &str, _error: &HostError) {}
}

/// One recorded lifecycle event.
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    #[allow(missing_docs)]
    Deployed { space: String, bundle: Arc<SpaceBundle> },
    #[allow(missing_docs)]
    Undeployed { space: String },
    #[allow(missing_docs)]
    Failed { space: String, error: HostError },
}

impl DeploymentEvent {
    /// Space the event concerns.
    #[must_use]
    pub fn space(&self) -> &str {
        match self {
            Self::Deployed { space, .. } | Self::Undeployed { space } | Self::Failed { space, .. } => space,
        }
    }

    fn dispatch(&self, target: &dyn DeploymentListener) {
        match self {
            Self::Deployed { space, bundle } => target.deployed(space, bundle),
            Self::Undeployed { space } => target.undeployed(space),
            Self::Failed { space, error } => target.failed(space, error),
        }
    }
}

#[derive(Default)]
struct DeferredState {
    target: Option<Arc<dyn DeploymentListener>>,
    /// Set by the first activation before it starts replaying.
    claimed: bool,
    queue: Vec<DeploymentEvent>,
}

/// Queues events until a target listener is supplied.
#[derive(Default)]
pub struct DeferredListener {
    state: Mutex<DeferredState>,
}

impl DeferredListener {
    /// Creates an inactive listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events waiting for activation.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).queue.len()
    }

    /// True once a target has been installed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .target
            .is_some()
    }

    /// Replays queued events into `target` in arrival order, then forwards
    /// every later event directly.
    ///
    /// Events raised while the replay runs are queued behind it. Only the
    /// first activation is honored; any later one, including one racing the
    /// first one's replay, is ignored and receives nothing.
    pub fn activate(&self, target: Arc<dyn DeploymentListener>) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.claimed {
                warn!("deployment listener already active; ignoring activation");
                return;
            }
            state.claimed = true;
        }

        let mut replayed = 0usize;
        loop {
            let batch = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.queue.is_empty() {
                    state.target = Some(Arc::clone(&target));
                    break;
                }
                std::mem::take(&mut state.queue)
            };
            replayed += batch.len();
            for event in &batch {
                event.dispatch(target.as_ref());
            }
        }
        debug!(replayed, "deployment listener activated");
    }

    fn emit(&self, event: DeploymentEvent) {
        let target = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &state.target {
                Some(target) => Arc::clone(target),
                None => {
                    state.queue.push(event);
                    return;
                }
            }
        };
        event.dispatch(target.as_ref());
    }
}

impl DeploymentListener for DeferredListener {
    fn deployed(&self, space: &str, bundle: &Arc<SpaceBundle>) {
        self.emit(DeploymentEvent::Deployed {
            space: space.to_string(),
            bundle: Arc::clone(bundle),
        });
    }

    fn undeployed(&self, space: &str) {
        self.emit(DeploymentEvent::Undeployed {
            space: space.to_string(),
        });
    }

    fn failed(&self, space: &str, error: &HostError) {
        self.emit(DeploymentEvent::Failed {
            space: space.to_string(),
            error: error.clone(),
        });
    }
}
