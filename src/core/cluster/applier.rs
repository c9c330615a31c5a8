// src/core/cluster/applier.rs

//! The single-threaded cluster-state applier.
//!
//! The external consensus layer delivers ordered snapshots into an mpsc
//! channel; the applier task swaps the current-state watch and invokes the
//! registered listeners, in that order, so a listener reading
//! [`ClusterStateApplier::current_state`] always sees at least the state it
//! is being notified about. Listeners run on the applier task and must not
//! block; long work is spawned onto the runtime.

use crate::core::cluster::state::{ClusterChangedEvent, ClusterState};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub trait ClusterStateListener: Send + Sync {
    /// Invoked on the applier task for every applied snapshot.
    fn cluster_changed(&self, event: &ClusterChangedEvent);
}

pub struct ClusterStateApplier {
    listeners: RwLock<Vec<Arc<dyn ClusterStateListener>>>,
    current_tx: watch::Sender<Arc<ClusterState>>,
}

impl ClusterStateApplier {
    pub fn new(initial: Arc<ClusterState>) -> Arc<Self> {
        let (current_tx, _) = watch::channel(initial);
        Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
            current_tx,
        })
    }

    pub fn register_listener(&self, listener: Arc<dyn ClusterStateListener>) {
        self.listeners.write().push(listener);
    }

    /// The most recently applied snapshot.
    pub fn current_state(&self) -> Arc<ClusterState> {
        self.current_tx.borrow().clone()
    }

    /// A watch over applied snapshots, for waiters that filter by key instead
    /// of registering a listener.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.current_tx.subscribe()
    }

    /// Applies one snapshot. Called from the single applier task only;
    /// snapshots arriving out of version order are dropped.
    pub fn apply(&self, state: Arc<ClusterState>) {
        let previous = self.current_state();
        if state.version < previous.version {
            warn!(
                "Dropping stale cluster state version {} (current is {})",
                state.version, previous.version
            );
            return;
        }
        let event = ClusterChangedEvent {
            previous,
            current: state.clone(),
        };
        self.current_tx.send_replace(state);
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            listener.cluster_changed(&event);
        }
    }

    /// The applier loop: drains ordered snapshots until the channel closes or
    /// shutdown is requested.
    pub async fn run(
        self: Arc<Self>,
        mut states: mpsc::Receiver<Arc<ClusterState>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = states.recv() => match next {
                    Some(state) => self.apply(state),
                    None => break,
                },
            }
        }
        info!("Cluster state applier stopped.");
    }
}
