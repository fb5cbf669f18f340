use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracker_core::clock::{Clock, SystemClock};
use tracker_core::config::Config;
use tracker_core::engine::Engine;
use tracker_core::notify::{FanoutNotifier, LogNotifier, TransitionEvent};
use tracker_core::paths;
use tracker_core::store::{OrderStore, RedbStore};

use crate::notify::BroadcastNotifier;
use crate::worker::WorkerHandle;

const EVENT_CAPACITY: usize = 256;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub engine: Arc<Engine>,
    pub worker: WorkerHandle,
    pub event_tx: broadcast::Sender<TransitionEvent>,
}

impl AppState {
    /// Open the project at `root`: load config, open the order database and
    /// start the auto-progress worker (when inside a Tokio runtime).
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root)?;
        let store = RedbStore::open(&paths::db_path(root))?;
        Self::from_parts(root.to_path_buf(), Arc::new(store), &config)
    }

    /// Build state around an existing store. Transition events go to the log
    /// and to SSE subscribers.
    pub fn from_parts(
        root: PathBuf,
        store: Arc<dyn OrderStore>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        Self::from_parts_with_clock(root, store, config, Arc::new(SystemClock))
    }

    pub fn from_parts_with_clock(
        root: PathBuf,
        store: Arc<dyn OrderStore>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let notifier = FanoutNotifier::new()
            .with(LogNotifier)
            .with(BroadcastNotifier::new(event_tx.clone()));
        let engine = Engine::from_config(store, &config.auto_progress)?
            .with_clock(clock)
            .with_notifier(Arc::new(notifier));
        let engine = Arc::new(engine);
        let worker = WorkerHandle::spawn(Arc::clone(&engine), &config.auto_progress);

        Ok(Self {
            root,
            engine,
            worker,
            event_tx,
        })
    }
}
